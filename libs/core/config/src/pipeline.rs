//! Tunables for the detection pipeline.
//!
//! Every value has a default matching production behaviour, so a bare
//! environment yields a working configuration.

use crate::{env_optional, env_or_default, env_parse_or_default, ConfigError, FromEnv};
use std::time::Duration;

/// Event Poller settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollerSettings {
    /// Delay between two polls of the same hospital
    pub interval: Duration,
    /// How far back a poll looks for unprocessed records
    pub lookback: Duration,
    /// Upper bound on a single polling tick
    pub tick_timeout: Duration,
    /// How often the active hospital list is reloaded
    pub hospital_refresh: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            lookback: Duration::from_secs(24 * 3600),
            tick_timeout: Duration::from_secs(10),
            hospital_refresh: Duration::from_secs(30),
        }
    }
}

impl FromEnv for PollerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_secs(env_parse_or_default("POLLER_INTERVAL_SECS", 3)?),
            lookback: Duration::from_secs(
                env_parse_or_default::<u64>("POLLER_LOOKBACK_HOURS", 24)? * 3600,
            ),
            tick_timeout: Duration::from_secs(env_parse_or_default(
                "POLLER_TICK_TIMEOUT_SECS",
                10,
            )?),
            hospital_refresh: Duration::from_secs(env_parse_or_default(
                "POLLER_HOSPITAL_REFRESH_SECS",
                30,
            )?),
        })
    }
}

/// Eligibility Engine and triage consumer settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriageSettings {
    pub rule_cache_ttl: Duration,
    /// Window used by the fallback rule set when stored rules are unreadable
    pub window_hours: u32,
    pub block_ms: u64,
    pub batch_size: usize,
    /// Idle time after which another consumer's pending entry is reclaimed
    pub claim_idle_ms: u64,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            rule_cache_ttl: Duration::from_secs(300),
            window_hours: 6,
            block_ms: 5000,
            batch_size: 10,
            claim_idle_ms: 60_000,
        }
    }
}

impl FromEnv for TriageSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rule_cache_ttl: Duration::from_secs(env_parse_or_default(
                "TRIAGE_RULE_CACHE_TTL_SECS",
                300,
            )?),
            window_hours: env_parse_or_default("TRIAGE_WINDOW_HOURS", 6)?,
            block_ms: env_parse_or_default("TRIAGE_BLOCK_MS", 5000)?,
            batch_size: env_parse_or_default("TRIAGE_BATCH_SIZE", 10)?,
            claim_idle_ms: env_parse_or_default("TRIAGE_CLAIM_IDLE_MS", 60_000)?,
        })
    }
}

/// Notification Dispatcher settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Bound on any single channel call
    pub channel_timeout: Duration,
    /// Base URL used to build links to the dashboard
    pub dashboard_base_url: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            channel_timeout: Duration::from_secs(10),
            dashboard_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl FromEnv for DispatchSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            channel_timeout: Duration::from_secs(env_parse_or_default(
                "DISPATCH_CHANNEL_TIMEOUT_SECS",
                10,
            )?),
            dashboard_base_url: env_or_default("DASHBOARD_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Twilio credentials. `None` from [`TwilioSettings::from_env_optional`]
/// disables the SMS channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl TwilioSettings {
    pub fn from_env_optional() -> Option<Self> {
        Some(Self {
            account_sid: env_optional("TWILIO_ACCOUNT_SID")?,
            auth_token: env_optional("TWILIO_AUTH_TOKEN")?,
            from_number: env_optional("TWILIO_PHONE_NUMBER")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_defaults() {
        temp_env::with_vars(
            [
                ("POLLER_INTERVAL_SECS", None::<&str>),
                ("POLLER_LOOKBACK_HOURS", None::<&str>),
                ("POLLER_TICK_TIMEOUT_SECS", None::<&str>),
                ("POLLER_HOSPITAL_REFRESH_SECS", None::<&str>),
            ],
            || {
                let settings = PollerSettings::from_env().unwrap();
                assert_eq!(settings, PollerSettings::default());
                assert_eq!(settings.interval, Duration::from_secs(3));
                assert_eq!(settings.lookback, Duration::from_secs(86_400));
                assert_eq!(settings.hospital_refresh, Duration::from_secs(30));
            },
        );
    }

    #[test]
    fn test_poller_overrides() {
        temp_env::with_vars(
            [
                ("POLLER_INTERVAL_SECS", Some("1")),
                ("POLLER_LOOKBACK_HOURS", Some("2")),
            ],
            || {
                let settings = PollerSettings::from_env().unwrap();
                assert_eq!(settings.interval, Duration::from_secs(1));
                assert_eq!(settings.lookback, Duration::from_secs(7200));
            },
        );
    }

    #[test]
    fn test_triage_invalid_value_names_the_key() {
        temp_env::with_var("TRIAGE_BATCH_SIZE", Some("-3"), || {
            let err = TriageSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("TRIAGE_BATCH_SIZE"));
        });
    }

    #[test]
    fn test_dispatch_trims_trailing_slash() {
        temp_env::with_var("DASHBOARD_BASE_URL", Some("https://vigil.example/"), || {
            let settings = DispatchSettings::from_env().unwrap();
            assert_eq!(settings.dashboard_base_url, "https://vigil.example");
        });
    }

    #[test]
    fn test_twilio_requires_all_three() {
        temp_env::with_vars(
            [
                ("TWILIO_ACCOUNT_SID", Some("AC123")),
                ("TWILIO_AUTH_TOKEN", Some("secret")),
                ("TWILIO_PHONE_NUMBER", None::<&str>),
            ],
            || {
                assert!(TwilioSettings::from_env_optional().is_none());
            },
        );
        temp_env::with_vars(
            [
                ("TWILIO_ACCOUNT_SID", Some("AC123")),
                ("TWILIO_AUTH_TOKEN", Some("secret")),
                ("TWILIO_PHONE_NUMBER", Some("+15550001111")),
            ],
            || {
                let settings = TwilioSettings::from_env_optional().unwrap();
                assert_eq!(settings.from_number, "+15550001111");
            },
        );
    }
}
