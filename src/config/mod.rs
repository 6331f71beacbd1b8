//! Configuration loading and parsing.
//!
//! YAML configuration for the server settings and its recurring jobs.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{RecurringJobConfigBuilder, load_recurring_jobs_from_directory};
pub use error::ConfigError;
pub use types::{
    JobDetailsConfig, KeeperConfig, ParameterConfig, RecurringJobConfig, ScheduleConfig,
    ServerConfig,
};
pub use yaml::YamlLoader;
