//! RuntimeConfig - TOML 設定
//!
//! どのセクションも省略可能で、省略時はデフォルト値になる。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::RetrySettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub cron: CronConfig,
    pub failed_task: FailedTaskConfig,
    pub control: ControlConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Reported through `getMetrics`; nothing binds to `host`/`port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub environment: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "cadence".to_string(),
            environment: "development".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9501,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Run the cron scheduler in this process.
    pub cron: bool,
    /// Run the task worker pool in this process.
    pub task: bool,
    pub task_workers: usize,
    pub queue_capacity: usize,
    /// Execute tasks inline at dispatch time.
    pub sync_mode: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cron: true,
            task: true,
            task_workers: 4,
            queue_capacity: 1024,
            sync_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    pub tick_interval_secs: u64,
    pub lock_ttl_secs: u64,
}

impl CronConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            // 1 分より短くして、tick が遅れても due な分を取りこぼさない
            tick_interval_secs: 5,
            lock_ttl_secs: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedTaskConfig {
    pub retry_schedule: String,
    pub max_attempt: u32,
    pub batch_size: usize,
    pub throttle_ms: u64,
}

impl FailedTaskConfig {
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            schedule: self.retry_schedule.clone(),
            max_attempt: self.max_attempt,
            batch_size: self.batch_size,
            throttle: Duration::from_millis(self.throttle_ms),
        }
    }
}

impl Default for FailedTaskConfig {
    fn default() -> Self {
        let retry = RetrySettings::default();
        Self {
            retry_schedule: retry.schedule,
            max_attempt: retry.max_attempt,
            batch_size: retry.batch_size,
            throttle_ms: retry.throttle.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:9502".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file shared by the failure store and the cron lock.
    /// `None` keeps both in memory (single process only).
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cron.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("cron.tick_interval_secs must be > 0".into()));
        }
        // ロックが tick より先に切れると同じ分に二重起動しうる
        if self.cron.lock_ttl_secs <= self.cron.tick_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "cron.lock_ttl_secs ({}) must be greater than cron.tick_interval_secs ({})",
                self.cron.lock_ttl_secs, self.cron.tick_interval_secs
            )));
        }
        if self.worker.task_workers == 0 {
            return Err(ConfigError::Invalid("worker.task_workers must be >= 1".into()));
        }
        if self.worker.queue_capacity == 0 {
            return Err(ConfigError::Invalid("worker.queue_capacity must be >= 1".into()));
        }
        if self.failed_task.batch_size == 0 {
            return Err(ConfigError::Invalid("failed_task.batch_size must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.cron.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.cron.lock_ttl(), Duration::from_secs(1200));
        assert_eq!(config.failed_task.retry_settings(), RetrySettings::default());
        assert_eq!(config.control.address, "127.0.0.1:9502");
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [server]
            name = "billing"

            [worker]
            sync_mode = true
            task_workers = 2

            [failed_task]
            max_attempt = 3

            [storage]
            database_path = "/var/lib/cadence/state.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.name, "billing");
        assert_eq!(config.server.port, 9501);
        assert!(config.worker.sync_mode);
        assert!(config.worker.cron);
        assert_eq!(config.worker.task_workers, 2);
        assert_eq!(config.failed_task.max_attempt, 3);
        assert_eq!(config.failed_task.batch_size, 10);
        assert_eq!(
            config.storage.database_path.as_deref(),
            Some(Path::new("/var/lib/cadence/state.db"))
        );
    }

    #[rstest]
    #[case("[cron]\ntick_interval_secs = 0")]
    #[case("[cron]\ntick_interval_secs = 60\nlock_ttl_secs = 60")]
    #[case("[worker]\ntask_workers = 0")]
    #[case("[worker]\nqueue_capacity = 0")]
    #[case("[failed_task]\nbatch_size = 0")]
    fn rejects_invalid_values(#[case] raw: &str) {
        assert!(matches!(
            RuntimeConfig::from_toml_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[worker\ncron = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\njson = true").unwrap();

        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let missing = RuntimeConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
