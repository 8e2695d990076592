//! Configuration settings loaded from environment variables
//!
//! Every key is optional. Unset keys fall back to the same defaults as
//! [`QueueConfig::default()`]; values that are set but cannot be parsed are a
//! `ConfigurationError`.
//!
//! | Key                     | Meaning                                  |
//! |-------------------------|------------------------------------------|
//! | `QML_QUEUE_NAME`        | queue name used in logs                  |
//! | `QML_CONCURRENCY`       | worker pool size                         |
//! | `QML_JOB_TIMEOUT_MS`    | default per-attempt timeout              |
//! | `QML_MAX_ATTEMPTS`      | default attempts per job                 |
//! | `QML_BACKOFF`           | `fixed` or `exponential`                 |
//! | `QML_BACKOFF_BASE_MS`   | base backoff delay                       |
//! | `QML_MAX_PENDING`       | backpressure capacity                    |
//! | `QML_MAX_FINISHED`      | finished jobs kept (`0` keeps none)      |
//! | `QML_FINISHED_TTL_SECS` | finished job lifetime                    |
//! | `QML_DASHBOARD_HOST`    | dashboard bind host                      |
//! | `QML_DASHBOARD_PORT`    | dashboard bind port                      |
//! | `QML_LOG_LEVEL`         | tracing filter for binaries              |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::DEFAULT_MAX_ATTEMPTS;
use crate::error::{QmlError, Result};
use crate::processing::{Backoff, QueueConfig};
use crate::storage::{StoreConfig, DEFAULT_MAX_FINISHED};

/// Application settings loaded from environment variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub queue_name: String,
    pub concurrency: usize,
    pub job_timeout_ms: Option<u64>,
    pub max_attempts: u32,
    pub backoff: String,
    pub backoff_base_ms: u64,
    pub max_pending: Option<usize>,
    pub max_finished: usize,
    pub finished_ttl_secs: Option<u64>,

    /// Dashboard server host
    pub dashboard_host: String,
    /// Dashboard server port
    pub dashboard_port: u16,
    /// Log level
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            queue_name: queue.name,
            concurrency: queue.concurrency,
            job_timeout_ms: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: "exponential".to_string(),
            backoff_base_ms: queue.default_backoff.base_delay_ms(),
            max_pending: None,
            max_finished: DEFAULT_MAX_FINISHED,
            finished_ttl_secs: None,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 8080,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// A `.env` file in the working directory, if present, supplies values for
    /// keys the environment does not set. The process environment is never
    /// modified.
    pub fn from_env() -> Result<Self> {
        let dotenv = read_dotenv(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok().or_else(|| dotenv.get(key).cloned()))
    }

    /// Load settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let string = |key: &str, default: String| -> String {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };

        let backoff = string("QML_BACKOFF", defaults.backoff).to_lowercase();
        if backoff != "fixed" && backoff != "exponential" {
            return Err(invalid("QML_BACKOFF", &backoff));
        }

        Ok(Settings {
            queue_name: string("QML_QUEUE_NAME", defaults.queue_name),
            concurrency: parse(&lookup, "QML_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            job_timeout_ms: parse(&lookup, "QML_JOB_TIMEOUT_MS")?,
            max_attempts: parse(&lookup, "QML_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            backoff,
            backoff_base_ms: parse(&lookup, "QML_BACKOFF_BASE_MS")?
                .unwrap_or(defaults.backoff_base_ms),
            max_pending: parse(&lookup, "QML_MAX_PENDING")?,
            max_finished: parse(&lookup, "QML_MAX_FINISHED")?.unwrap_or(defaults.max_finished),
            finished_ttl_secs: parse(&lookup, "QML_FINISHED_TTL_SECS")?,
            dashboard_host: string("QML_DASHBOARD_HOST", defaults.dashboard_host),
            dashboard_port: parse(&lookup, "QML_DASHBOARD_PORT")?
                .unwrap_or(defaults.dashboard_port),
            log_level: string("QML_LOG_LEVEL", defaults.log_level),
        })
    }

    /// Build the queue configuration described by these settings
    pub fn queue_config(&self) -> Result<QueueConfig> {
        let backoff = match self.backoff.as_str() {
            "fixed" => Backoff::fixed(self.backoff_base_ms),
            _ => Backoff::exponential(self.backoff_base_ms),
        };

        let mut store = StoreConfig::new().with_max_finished(self.max_finished);
        store.max_pending = self.max_pending;
        store.finished_ttl = self.finished_ttl_secs.map(Duration::from_secs);

        let mut config = QueueConfig::new(&self.queue_name)
            .concurrency(self.concurrency)
            .default_max_attempts(self.max_attempts)
            .default_backoff(backoff)
            .store(store);
        config.job_timeout = self.job_timeout_ms.map(Duration::from_millis);

        config.validate()?;
        Ok(config)
    }

    /// `host:port` the dashboard binds to
    pub fn dashboard_addr(&self) -> String {
        format!("{}:{}", self.dashboard_host, self.dashboard_port)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|value| value.trim().to_string()) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &value)),
    }
}

fn invalid(key: &str, value: &str) -> QmlError {
    QmlError::ConfigurationError {
        message: format!("Invalid value for {}: {}", key, value),
    }
}

/// Values from a `.env` file; empty when the file is missing. Lines that do
/// not parse are skipped with a warning.
fn read_dotenv(path: &Path) -> HashMap<String, String> {
    let Ok(entries) = dotenvy::from_path_iter(path) else {
        return HashMap::new();
    };

    entries
        .filter_map(|entry| match entry {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());

        let config = settings.queue_config().unwrap();
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_values_from_lookup() {
        let settings = Settings::from_lookup(lookup(&[
            ("QML_QUEUE_NAME", "commerce"),
            ("QML_CONCURRENCY", "8"),
            ("QML_JOB_TIMEOUT_MS", "30000"),
            ("QML_BACKOFF", "Fixed"),
            ("QML_BACKOFF_BASE_MS", "250"),
            ("QML_MAX_PENDING", "100"),
            ("QML_FINISHED_TTL_SECS", "3600"),
            ("QML_DASHBOARD_PORT", "9090"),
        ]))
        .unwrap();

        assert_eq!(settings.dashboard_addr(), "127.0.0.1:9090");

        let config = settings.queue_config().unwrap();
        assert_eq!(config.name, "commerce");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.default_backoff, Backoff::fixed(250));
        assert_eq!(config.store.max_pending, Some(100));
        assert_eq!(config.store.finished_ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_unparsable_values_are_rejected() {
        assert!(matches!(
            Settings::from_lookup(lookup(&[("QML_CONCURRENCY", "many")])),
            Err(QmlError::ConfigurationError { .. })
        ));
        assert!(matches!(
            Settings::from_lookup(lookup(&[("QML_BACKOFF", "linear")])),
            Err(QmlError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_zero_concurrency_fails_queue_config() {
        let settings = Settings::from_lookup(lookup(&[("QML_CONCURRENCY", "0")])).unwrap();
        assert!(settings.queue_config().is_err());
    }

    #[test]
    fn test_read_dotenv_missing_file() {
        assert!(read_dotenv(Path::new("/nonexistent/.env")).is_empty());
    }

    #[test]
    fn test_read_dotenv_handles_export_and_quotes() {
        let path = env::temp_dir().join(format!("qml-settings-{}.env", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "# queue settings\n\
             export QML_CONCURRENCY=7\n\
             QML_QUEUE_NAME=\"commerce queue\"\n\
             QML_LOG_LEVEL='debug'\n",
        )
        .unwrap();

        let values = read_dotenv(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(values.get("QML_CONCURRENCY").map(String::as_str), Some("7"));
        assert_eq!(values.get("QML_QUEUE_NAME").map(String::as_str), Some("commerce queue"));
        assert_eq!(values.get("QML_LOG_LEVEL").map(String::as_str), Some("debug"));

        let settings = Settings::from_lookup(|key| values.get(key).cloned()).unwrap();
        assert_eq!(settings.concurrency, 7);
        assert_eq!(settings.queue_name, "commerce queue");
    }
}
