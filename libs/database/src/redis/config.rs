#[cfg(feature = "config")]
use core_config::{ConfigError, FromEnv, env_optional};

/// Redis connection settings
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}

/// `REDIS_URL` is required; `REDIS_HOST` is accepted as a fallback name
#[cfg(feature = "config")]
impl FromEnv for RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        env_optional("REDIS_URL")
            .or_else(|| env_optional("REDIS_HOST"))
            .map(Self::new)
            .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        assert_eq!(RedisConfig::default().url, "redis://127.0.0.1:6379");
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_redis_config_from_env_prefers_redis_url() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://primary:6379")),
                ("REDIS_HOST", Some("redis://fallback:6379")),
            ],
            || {
                assert_eq!(RedisConfig::from_env().unwrap().url, "redis://primary:6379");
            },
        );
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_redis_config_from_env_falls_back_to_host() {
        temp_env::with_vars(
            [("REDIS_URL", None::<&str>), ("REDIS_HOST", Some("redis://prod:6379"))],
            || {
                assert_eq!(RedisConfig::from_env().unwrap().url, "redis://prod:6379");
            },
        );
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_redis_config_from_env_missing() {
        temp_env::with_vars(
            [("REDIS_URL", None::<&str>), ("REDIS_HOST", None::<&str>)],
            || {
                let err = RedisConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("REDIS_URL"));
            },
        );
    }
}
