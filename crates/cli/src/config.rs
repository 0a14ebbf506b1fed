//! Application configuration, read from a TOML file.
//!
//! ```toml
//! [orchestrator]
//! default_lease_ttl_secs = 300
//! retry_base_delay_ms = 500
//!
//! [worker]
//! workers = 8
//! ```
//!
//! Every key is optional; missing ones keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use engine::{OrchestratorConfig, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub worker: WorkerConfig,
}

/// Reference worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls while no step is Ready.
    pub poll_interval_ms: u64,
    /// Lease renewal cadence while a step executes.
    pub heartbeat_interval_ms: u64,
    /// Workers started by `aorctl run`.
    pub workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            heartbeat_interval_ms: 10_000,
            workers: 4,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl AppConfig {
    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.orchestrator.validate()?;
        if self.worker.workers == 0 {
            return Err(ValidationError::InvalidConfig(
                "worker.workers must be at least 1".into(),
            ));
        }
        if self.worker.heartbeat_interval_ms == 0 {
            return Err(ValidationError::InvalidConfig(
                "worker.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if self.worker.heartbeat_interval() >= self.orchestrator.default_lease_ttl() {
            return Err(ValidationError::InvalidConfig(
                "worker.heartbeat_interval_ms must be shorter than the default lease TTL".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use std::io::Write;

    use engine::FailurePolicy;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn no_path_means_defaults() {
        let config = AppConfig::load(None).expect("defaults");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let file = write_config(
            r#"
            [orchestrator]
            retry_base_delay_ms = 250
            default_failure_policy = "tolerant"

            [worker]
            workers = 8
            "#,
        );
        let config = AppConfig::load(Some(file.path())).expect("load");

        assert_eq!(config.orchestrator.retry_base_delay_ms, 250);
        assert_eq!(config.orchestrator.default_failure_policy, FailurePolicy::Tolerant);
        assert_eq!(config.orchestrator.default_lease_ttl_secs, 1800);
        assert_eq!(config.worker.workers, 8);
        assert_eq!(config.worker.poll_interval_ms, 200);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config("[worker]\nworkers = \"many\"\n");
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn heartbeat_must_beat_the_lease_ttl() {
        let file = write_config(
            "[orchestrator]\ndefault_lease_ttl_secs = 5\n[worker]\nheartbeat_interval_ms = 5000\n",
        );
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(ConfigError::Invalid(ValidationError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).expect("render");
        assert!(rendered.contains("[orchestrator]"));
        assert!(rendered.contains("default_failure_policy = \"fail_fast\""));
    }
}
