//! Capture window arithmetic.

use chrono::{DateTime, Duration, Utc};

pub const CAPTURE_WINDOW_HOURS: i64 = 6;

pub fn capture_window() -> Duration {
    Duration::hours(CAPTURE_WINDOW_HOURS)
}

/// Absolute end of the action window for a death at `death_time`.
pub fn window_expires_at(death_time: DateTime<Utc>) -> DateTime<Utc> {
    death_time + capture_window()
}

/// Time left until `expires_at`, never negative.
pub fn time_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).max(Duration::zero())
}

/// `"Xh Ymin"`, or `"expired"` once nothing is left.
pub fn format_remaining(remaining: Duration) -> String {
    if remaining <= Duration::zero() {
        return "expired".to_string();
    }
    let minutes = remaining.num_minutes();
    format!("{}h {}min", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_six_hours_after_death() {
        let death = Utc::now();
        assert_eq!(window_expires_at(death) - death, Duration::hours(6));
    }

    #[test]
    fn test_remaining_one_hour_after_death_is_about_five_hours() {
        let now = Utc::now();
        let remaining = time_remaining(window_expires_at(now - Duration::hours(1)), now);
        let delta = (remaining - Duration::hours(5)).num_seconds().abs();
        assert!(delta <= 120, "remaining was {remaining}");
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let now = Utc::now();
        let remaining = time_remaining(window_expires_at(now - Duration::hours(7)), now);
        assert_eq!(remaining, Duration::zero());
        assert_eq!(format_remaining(remaining), "expired");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::minutes(275)), "4h 35min");
        assert_eq!(format_remaining(Duration::seconds(59)), "0h 0min");
        assert_eq!(format_remaining(Duration::hours(6)), "6h 0min");
    }
}
