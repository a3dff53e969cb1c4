//! Runtime settings for the booking core
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `BROKER__`, using `__` between
//! section and key (`BROKER__CREDENTIALS__MEETING_PROOF_TTL_SECS=120`).

use common::{cache::RedisConfig, database::DatabaseConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Time-to-live of the short-lived credentials kept in the cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// How long a rendered meeting challenge stays valid
    pub meeting_proof_ttl_secs: u64,
    /// How long a one-time login code stays valid
    pub one_time_code_ttl_secs: u64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            meeting_proof_ttl_secs: 300,
            one_time_code_ttl_secs: 300,
        }
    }
}

impl CredentialSettings {
    pub fn meeting_proof_ttl(&self) -> Duration {
        Duration::from_secs(self.meeting_proof_ttl_secs)
    }

    pub fn one_time_code_ttl(&self) -> Duration {
        Duration::from_secs(self.one_time_code_ttl_secs)
    }
}

/// Balances granted when an account is opened
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub client_opening_balance: i64,
    pub photographer_opening_balance: i64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            client_opening_balance: 1000,
            photographer_opening_balance: 0,
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub credentials: CredentialSettings,
    pub accounts: AccountSettings,
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("BROKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.meeting_proof_ttl_secs == 0 {
            return Err(ConfigError::Message(
                "credentials.meeting_proof_ttl_secs must be positive".to_string(),
            ));
        }
        if self.credentials.one_time_code_ttl_secs == 0 {
            return Err(ConfigError::Message(
                "credentials.one_time_code_ttl_secs must be positive".to_string(),
            ));
        }
        if self.accounts.client_opening_balance < 0
            || self.accounts.photographer_opening_balance < 0
        {
            return Err(ConfigError::Message(
                "opening balances must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults_without_sources() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.credentials.meeting_proof_ttl(), Duration::from_secs(300));
        assert_eq!(settings.accounts.client_opening_balance, 1000);
        assert_eq!(settings.accounts.photographer_opening_balance, 0);
        assert_eq!(settings.redis.url, "redis://localhost:6379");
    }

    #[test]
    #[serial]
    fn test_file_then_environment_override() {
        let path = std::env::temp_dir()
            .join(format!("broker-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[credentials]\nmeeting_proof_ttl_secs = 120\n\n\
             [database]\ndatabase_url = \"postgresql://file/db\""
        )
        .unwrap();

        unsafe {
            std::env::set_var("BROKER__CREDENTIALS__ONE_TIME_CODE_TTL_SECS", "45");
        }

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.credentials.meeting_proof_ttl_secs, 120);
        assert_eq!(settings.credentials.one_time_code_ttl_secs, 45);
        assert_eq!(settings.database.database_url, "postgresql://file/db");
        assert_eq!(settings.database.max_connections, 10);

        unsafe {
            std::env::remove_var("BROKER__CREDENTIALS__ONE_TIME_CODE_TTL_SECS");
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    #[serial]
    fn test_zero_ttl_is_rejected() {
        unsafe {
            std::env::set_var("BROKER__CREDENTIALS__MEETING_PROOF_TTL_SECS", "0");
        }

        assert!(Settings::load(None).is_err());

        unsafe {
            std::env::remove_var("BROKER__CREDENTIALS__MEETING_PROOF_TTL_SECS");
        }
    }
}
