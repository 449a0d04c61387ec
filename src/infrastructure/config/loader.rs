use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Worker type '{0}' has no command")]
    EmptyWorkerCommand(String),

    #[error("Worker type '{0}' must allow at least one instance")]
    ZeroInstances(String),

    #[error("Duplicate worker type: {0}")]
    DuplicateWorkerType(String),

    #[error("Watchdog thresholds must be ordered: warning < critical < recovery")]
    UnorderedWatchdogThresholds,

    #[error("Auto-respond entry for '{0}' has no command")]
    EmptyAutoRespondCommand(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .tandem/config.yaml (project config)
    /// 3. .tandem/local.yaml (project local overrides, optional)
    /// 4. Environment variables (TANDEM_* prefix, highest priority)
    ///
    /// Configuration is project-local so multiple pairs can run on one
    /// machine against different projects.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".tandem/config.yaml"))
            .merge(Yaml::file(".tandem/local.yaml"))
            .merge(Env::prefixed("TANDEM_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("TANDEM_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for worker in &config.workers {
            if worker.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Worker type name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(worker.name.clone()) {
                return Err(ConfigError::DuplicateWorkerType(worker.name.clone()));
            }
            if worker.command.trim().is_empty() {
                return Err(ConfigError::EmptyWorkerCommand(worker.name.clone()));
            }
            if worker.instances == 0 {
                return Err(ConfigError::ZeroInstances(worker.name.clone()));
            }
        }

        let w = &config.watchdog;
        if !(w.warning_sec < w.critical_sec && w.critical_sec < w.recovery_sec) {
            return Err(ConfigError::UnorderedWatchdogThresholds);
        }

        for entry in &config.auto_respond {
            if entry.command.trim().is_empty() {
                return Err(ConfigError::EmptyAutoRespondCommand(entry.agent.clone()));
            }
        }

        Ok(())
    }

    /// Resolve the database path: explicit config wins, otherwise the
    /// per-user config directory.
    pub fn database_path(config: &Config) -> PathBuf {
        if !config.database.path.is_empty() {
            return PathBuf::from(&config.database.path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
            .join("tandem.db")
    }
}
