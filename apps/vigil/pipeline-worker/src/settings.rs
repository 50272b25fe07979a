//! Worker configuration, composed from the shared config components.

use core_config::pipeline::{DispatchSettings, PollerSettings, TriageSettings, TwilioSettings};
use core_config::{Environment, FromEnv, server::ServerConfig};
use database::{postgres::PostgresConfig, redis::RedisConfig};
use eyre::{Result, WrapErr};
use notification_dispatch::SmtpConfig;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub environment: Environment,
    pub database: PostgresConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub poller: PollerSettings,
    pub triage: TriageSettings,
    pub dispatch: DispatchSettings,
    /// `None` disables the email channel
    pub smtp: Option<SmtpConfig>,
    /// `None` disables the SMS channel
    pub twilio: Option<TwilioSettings>,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            environment: Environment::from_env(),
            database: PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?,
            redis: RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?,
            server: ServerConfig::from_env().wrap_err("Failed to load server configuration")?,
            poller: PollerSettings::from_env().wrap_err("Failed to load poller settings")?,
            triage: TriageSettings::from_env().wrap_err("Failed to load triage settings")?,
            dispatch: DispatchSettings::from_env().wrap_err("Failed to load dispatch settings")?,
            smtp: SmtpConfig::from_env_optional().wrap_err("Failed to load SMTP configuration")?,
            twilio: TwilioSettings::from_env_optional(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn with_required<'a>(extra: &[(&'a str, Option<&'a str>)]) -> Vec<(&'a str, Option<&'a str>)> {
        let mut vars = vec![
            ("DATABASE_URL", Some("postgresql://localhost/vigil")),
            ("REDIS_URL", Some("redis://localhost:6379")),
        ];
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn test_optional_channels_disabled_by_default() {
        temp_env::with_vars(
            with_required(&[
                ("SMTP_HOST", None),
                ("TWILIO_ACCOUNT_SID", None),
                ("POLLER_INTERVAL_SECS", None),
            ]),
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert!(settings.smtp.is_none());
                assert!(settings.twilio.is_none());
                assert_eq!(settings.poller.interval, Duration::from_secs(3));
                assert_eq!(settings.server.health_port, 8082);
            },
        );
    }

    #[test]
    fn test_smtp_enabled_by_host() {
        temp_env::with_vars(
            with_required(&[
                ("SMTP_HOST", Some("smtp.hospital.example")),
                ("SMTP_PORT", Some("2525")),
            ]),
            || {
                let smtp = WorkerSettings::from_env().unwrap().smtp.unwrap();
                assert_eq!(smtp.host, "smtp.hospital.example");
                assert_eq!(smtp.port, 2525);
            },
        );
    }

    #[test]
    fn test_missing_database_url_names_the_key() {
        temp_env::with_vars(
            [("DATABASE_URL", None::<&str>), ("REDIS_URL", Some("redis://localhost:6379"))],
            || {
                let err = WorkerSettings::from_env().unwrap_err();
                assert!(format!("{err:?}").contains("DATABASE_URL"));
            },
        );
    }
}
