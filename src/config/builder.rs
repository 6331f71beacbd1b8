//! Recurring job builder from YAML configuration.

use std::path::Path;

use crate::core::details::{JobDetails, JobParameter};
use crate::core::recurring::RecurringJob;
use crate::core::schedule::Schedule;

use super::error::ConfigError;
use super::types::{KeeperConfig, RecurringJobConfig};
use super::yaml::YamlLoader;

/// Builder for creating recurring jobs from configuration.
pub struct RecurringJobConfigBuilder;

impl RecurringJobConfigBuilder {
    /// Build a recurring job. `default_timezone` applies when the schedule
    /// names none; UTC otherwise.
    pub fn build(
        config: &RecurringJobConfig,
        default_timezone: Option<&str>,
    ) -> Result<RecurringJob, ConfigError> {
        let timezone = config
            .schedule
            .timezone()
            .or(default_timezone)
            .unwrap_or("UTC");
        let schedule = Schedule::with_timezone(config.schedule.cron(), timezone).map_err(|e| {
            ConfigError::InvalidConfig(format!("{}: invalid schedule: {}", config.id, e))
        })?;

        let parameters = config
            .job
            .parameters
            .iter()
            .map(|p| -> Result<JobParameter, ConfigError> {
                Ok(JobParameter::new(&p.class, serde_json::to_string(&p.value)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let details =
            JobDetails::new(&config.job.class, &config.job.method).with_parameters(parameters);

        Ok(RecurringJob::new(config.id.as_str(), details, schedule))
    }

    /// Build every recurring job of a configuration file.
    pub fn build_all(config: &KeeperConfig) -> Result<Vec<RecurringJob>, ConfigError> {
        config
            .recurring_jobs
            .iter()
            .map(|rj| Self::build(rj, config.default_timezone.as_deref()))
            .collect()
    }
}

/// Load every `.yaml`/`.yml` recurring job definition in a directory.
pub fn load_recurring_jobs_from_directory(
    dir: impl AsRef<Path>,
    default_timezone: Option<&str>,
) -> Result<Vec<RecurringJob>, ConfigError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ConfigError::DirReadError {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let config = YamlLoader::load_recurring_job(path)?;
            RecurringJobConfigBuilder::build(&config, default_timezone)
        })
        .collect()
}
