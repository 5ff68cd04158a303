use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::Deserialize;
use strum::{Display, EnumString};
use uuid::Uuid;

const ENV_PREFIX: &str = "OFFLOAD_";

/// Which classification backend a worker is built with.
#[derive(Debug, Clone, Copy, Deserialize, EnumString, Display, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Heuristic,
    Http,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueueConfig {
    /// Root of the shared folder holding `pending/`, `complete/` and the
    /// worker-side locations.
    #[garde(skip)]
    pub queue_root: PathBuf,

    /// Sleep between idle worker scans and between result checks.
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,

    /// How long a submitter waits for a result before giving up.
    #[serde(default = "default_result_timeout_secs")]
    #[garde(range(min = 1))]
    pub result_timeout_secs: u64,

    /// Time a claimed job may stay in `processing/` before it is reclaimed.
    #[serde(default = "default_lease_duration_secs")]
    #[garde(range(min = 1))]
    pub lease_duration_secs: u64,

    /// Minimum time a pending file must stay unchanged before it is read.
    #[serde(default = "default_stability_window_ms")]
    #[garde(range(min = 1))]
    pub stability_window_ms: u64,

    /// Jobs claimed and processed per worker cycle.
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1, max = 64))]
    pub worker_concurrency: usize,

    /// Reclaims tolerated before a job is failed instead of reprocessed.
    #[serde(default = "default_max_attempts")]
    #[garde(range(min = 1))]
    pub max_attempts: u32,

    /// Age after which unread results are swept from `complete/`.
    #[serde(default = "default_result_retention_secs")]
    #[garde(range(min = 1))]
    pub result_retention_secs: u64,

    #[serde(default = "default_worker_id")]
    #[garde(length(min = 1, max = 100))]
    pub worker_id: String,

    #[serde(default)]
    #[garde(skip)]
    pub classifier_backend: ClassifierKind,

    /// Endpoint of the remote classifier (`http` backend only).
    #[serde(default)]
    #[garde(skip)]
    pub classifier_url: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub classifier_token: Option<String>,

    /// Status server bind address.
    #[serde(default = "default_bind_addr")]
    #[garde(skip)]
    pub bind_addr: String,

    /// Prometheus listener for the worker process. Disabled when unset.
    #[serde(default)]
    #[garde(skip)]
    pub metrics_addr: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_result_timeout_secs() -> u64 {
    600
}

fn default_lease_duration_secs() -> u64 {
    900
}

fn default_stability_window_ms() -> u64 {
    3_000
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_result_retention_secs() -> u64 {
    86_400
}

fn default_worker_id() -> String {
    format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl QueueConfig {
    /// Load from `OFFLOAD_*` environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Load from explicit key/value pairs using the same rules as `from_env`.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(pairs)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Defaults for everything except the queue root.
    pub fn with_root(queue_root: impl Into<PathBuf>) -> Self {
        Self {
            queue_root: queue_root.into(),
            poll_interval_ms: default_poll_interval_ms(),
            result_timeout_secs: default_result_timeout_secs(),
            lease_duration_secs: default_lease_duration_secs(),
            stability_window_ms: default_stability_window_ms(),
            worker_concurrency: default_worker_concurrency(),
            max_attempts: default_max_attempts(),
            result_retention_secs: default_result_retention_secs(),
            worker_id: default_worker_id(),
            classifier_backend: ClassifierKind::default(),
            classifier_url: None,
            classifier_token: None,
            bind_addr: default_bind_addr(),
            metrics_addr: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(garde::Report),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let config = QueueConfig::from_pairs(pairs(&[("OFFLOAD_QUEUE_ROOT", "/mnt/sync/offload")])).unwrap();
        assert_eq!(config.queue_root, PathBuf::from("/mnt/sync/offload"));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.lease_duration(), Duration::from_secs(900));
        assert_eq!(config.worker_concurrency, 1);
        assert_eq!(config.classifier_backend, ClassifierKind::Heuristic);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_overrides() {
        let config = QueueConfig::from_pairs(pairs(&[
            ("OFFLOAD_QUEUE_ROOT", "/q"),
            ("OFFLOAD_WORKER_CONCURRENCY", "4"),
            ("OFFLOAD_CLASSIFIER_BACKEND", "http"),
            ("OFFLOAD_CLASSIFIER_URL", "http://classifier.local/classify"),
        ]))
        .unwrap();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.classifier_backend, ClassifierKind::Http);
        assert_eq!(
            config.classifier_url.as_deref(),
            Some("http://classifier.local/classify")
        );
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let err = QueueConfig::from_pairs(Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Env(_)));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = QueueConfig::from_pairs(pairs(&[
            ("OFFLOAD_QUEUE_ROOT", "/q"),
            ("OFFLOAD_WORKER_CONCURRENCY", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_classifier_kind_from_str() {
        assert_eq!("http".parse::<ClassifierKind>().unwrap(), ClassifierKind::Http);
        assert_eq!(ClassifierKind::Heuristic.to_string(), "heuristic");
    }
}
