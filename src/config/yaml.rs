//! YAML configuration parsing.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{
    DEFAULT_TIMEOUT_POLLS, KeeperConfig, RecurringJobConfig, SECS_PER_HOUR, ServerConfig,
};
use crate::server::MAX_WORKER_POOL_SIZE;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load the configuration file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<KeeperConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: KeeperConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Parse a configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<KeeperConfig, ConfigError> {
        let config: KeeperConfig = serde_yaml::from_str(yaml)?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load a single recurring job definition from its own file.
    pub fn load_recurring_job(path: impl AsRef<Path>) -> Result<RecurringJobConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RecurringJobConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_recurring_job(&config)?;
        Ok(config)
    }

    /// Parse a single recurring job definition.
    pub fn parse_recurring_job(yaml: &str) -> Result<RecurringJobConfig, ConfigError> {
        let config: RecurringJobConfig = serde_yaml::from_str(yaml)?;
        Self::validate_recurring_job(&config)?;
        Ok(config)
    }

    fn validate_config(config: &KeeperConfig) -> Result<(), ConfigError> {
        Self::validate_server_config(&config.server)?;

        let mut ids = HashSet::new();
        for recurring_job in &config.recurring_jobs {
            Self::validate_recurring_job(recurring_job)?;
            if !ids.insert(recurring_job.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate recurring job id: {}",
                    recurring_job.id
                )));
            }
        }
        Ok(())
    }

    /// Validate server settings.
    pub fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
        if config.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_secs cannot be zero".into(),
            ));
        }
        if config.worker_pool_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_pool_size cannot be zero".into(),
            ));
        }
        if config.worker_pool_size > MAX_WORKER_POOL_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "worker_pool_size cannot exceed {}",
                MAX_WORKER_POOL_SIZE
            )));
        }
        // Defaulted timeouts are multiples of the poll interval.
        if config.poll_interval_secs.checked_mul(u64::from(DEFAULT_TIMEOUT_POLLS)).is_none()
            && (config.server_timeout_secs.is_none() || config.orphan_timeout_secs.is_none())
        {
            return Err(ConfigError::InvalidConfig(format!(
                "poll_interval_secs too large: {}",
                config.poll_interval_secs
            )));
        }
        for (field, hours) in [
            ("succeeded_retention_hours", config.succeeded_retention_hours),
            ("deleted_retention_hours", config.deleted_retention_hours),
        ] {
            if hours.checked_mul(SECS_PER_HOUR).is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{} too large: {}",
                    field, hours
                )));
            }
        }
        if config.page_size == 0 || config.max_pages_per_pass == 0 {
            return Err(ConfigError::InvalidConfig(
                "page_size and max_pages_per_pass must be positive".into(),
            ));
        }
        if config.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "heartbeat_interval_secs cannot be zero".into(),
            ));
        }
        // A running job must heartbeat before the orphan pass gives up on it.
        if config.heartbeat_interval() >= config.orphan_timeout() {
            return Err(ConfigError::InvalidConfig(format!(
                "heartbeat interval ({:?}) must be shorter than the orphan timeout ({:?})",
                config.heartbeat_interval(),
                config.orphan_timeout()
            )));
        }
        if config.server_timeout() <= config.poll_interval() {
            return Err(ConfigError::InvalidConfig(format!(
                "server timeout ({:?}) must be longer than the poll interval ({:?})",
                config.server_timeout(),
                config.poll_interval()
            )));
        }
        Ok(())
    }

    fn validate_recurring_job(config: &RecurringJobConfig) -> Result<(), ConfigError> {
        if config.id.trim().is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }
        if config.job.class.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}: job.class", config.id)));
        }
        if config.job.method.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}: job.method", config.id)));
        }
        if config.schedule.cron().trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}: schedule", config.id)));
        }
        Ok(())
    }
}
