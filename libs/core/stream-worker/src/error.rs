//! Stream error types and error categorization
//!
//! The category decides what happens to a failed job:
//! - **Transient**: re-enqueue after exponential backoff (1s base, 30s cap)
//! - **Permanent**: dead-letter immediately
//! - **RateLimited**: re-enqueue after a longer backoff (5s base, 120s cap)

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    RateLimited,
}

impl ErrorCategory {
    /// Retry ceiling used when the job does not define its own
    pub fn max_retries(&self) -> u32 {
        match self {
            ErrorCategory::Transient => 3,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 5,
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1000,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 5000,
        }
    }

    pub fn max_delay_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 30_000,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 120_000,
        }
    }

    /// Exponential backoff for the given retry count, capped per category
    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        if *self == ErrorCategory::Permanent {
            return 0;
        }

        let delay = self
            .base_delay_ms()
            .saturating_mul(2u64.saturating_pow(retry_count));
        delay.min(self.max_delay_ms())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::RateLimited => "rate_limited",
        }
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Processing error: {message}")]
    Processing {
        message: String,
        category: ErrorCategory,
    },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown requested")]
    Shutdown,
}

impl StreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        StreamError::Processing {
            message: message.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StreamError::Processing {
            message: message.into(),
            category: ErrorCategory::Permanent,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        StreamError::RateLimited(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Redis(_) => ErrorCategory::Transient,
            StreamError::Serialization(_) => ErrorCategory::Permanent,
            StreamError::Processing { category, .. } => *category,
            StreamError::RateLimited(_) => ErrorCategory::RateLimited,
            StreamError::Config(_) => ErrorCategory::Permanent,
            StreamError::Shutdown => ErrorCategory::Permanent,
        }
    }

    /// Whether a job that has already been retried `retry_count` times gets another attempt
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        self.category() != ErrorCategory::Permanent && retry_count < max_retries
    }

    pub fn backoff_delay_ms(&self, retry_count: u32) -> u64 {
        self.category().backoff_delay_ms(retry_count)
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCategory::Transient.max_retries(), 3);
        assert_eq!(ErrorCategory::Permanent.max_retries(), 0);
        assert_eq!(ErrorCategory::RateLimited.max_retries(), 5);
    }

    #[test]
    fn test_backoff_calculation() {
        // Transient: 1s, 2s, 4s, 8s, 16s, then capped
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(0), 1000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(1), 2000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(4), 16_000);
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(5), 30_000);

        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(0), 5000);
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(1), 10_000);
        assert_eq!(ErrorCategory::RateLimited.backoff_delay_ms(5), 120_000);

        assert_eq!(ErrorCategory::Permanent.backoff_delay_ms(0), 0);
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        assert_eq!(ErrorCategory::Transient.backoff_delay_ms(200), 30_000);
    }

    #[test]
    fn test_should_retry_uses_job_ceiling() {
        let transient = StreamError::transient("smtp timeout");
        assert!(transient.should_retry(0, 3));
        assert!(transient.should_retry(4, 5));
        assert!(!transient.should_retry(3, 3));

        let permanent = StreamError::permanent("invalid recipient");
        assert!(!permanent.should_retry(0, 5));
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            StreamError::Serialization("bad".into()).category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            StreamError::rate_limited("429").category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(ErrorCategory::RateLimited.as_str(), "rate_limited");
    }
}
