//! # Application configuration.
//!
//! [`Config`] holds every tunable of the manager. It is built once at process
//! start (defaults, or a YAML file) and passed by value into
//! [`Manager::builder`](crate::Manager::builder); nothing reads configuration
//! from global state.
//!
//! ## File format
//! ```yaml
//! log:
//!   level: 4                     # 1 fatal-only .. 5 debug (clamped)
//! manager:
//!   threadNumber: 2              # workers per controller
//!   controllerMaxRetryTimes: 5   # requeues before a key is dropped
//!   threadTimeout: 5             # seconds between worker-loop restarts
//!   reSyncPeriod: 300            # seconds between full resyncs (0 = off)
//!   shutdownGrace: 30            # seconds to wait for runtimes to drain
//!   busCapacity: 1024            # event bus ring size
//! ```
//!
//! Missing keys keep their defaults.
//!
//! ## Sentinel values
//! - `threadNumber = 0` → treated as 1
//! - `reSyncPeriod = 0` → periodic resync disabled
//! - `busCapacity = 0` → treated as 1

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Directories searched by [`Config::discover`], in order.
pub const CONFIG_SEARCH_PATHS: [&str; 4] = ["../config", "./config", "..", "."];

/// File name looked up in every search directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Errors raised while loading a configuration file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`Config`].
    #[error("decode config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Decoder cause.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Log verbosity, ordered from quietest to noisiest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Only unrecoverable conditions.
    Fatal = 1,
    /// Errors.
    Error = 2,
    /// Warnings and errors.
    Warning = 3,
    /// Lifecycle information.
    Info = 4,
    /// Per-key processing details.
    Debug = 5,
}

impl LogLevel {
    /// Maps a numeric verbosity onto a level, clamping to `1..=5`.
    pub fn from_verbosity(v: i64) -> Self {
        match v {
            i64::MIN..=1 => LogLevel::Fatal,
            2 => LogLevel::Error,
            3 => LogLevel::Warning,
            4 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    /// The `tracing` filter that lets exactly this verbosity through.
    ///
    /// `tracing` has no fatal level, so `Fatal` and `Error` share `ERROR`.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Fatal | LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Raw verbosity as written in the file; see [`Config::log_level`].
    pub level: i64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: 4 }
    }
}

/// Controller runtime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerConfig {
    /// Concurrent workers per controller runtime.
    pub thread_number: usize,

    /// How many times a failing key is requeued before it is dropped.
    pub controller_max_retry_times: u32,

    /// Pause before a worker loop restarts after an unsuccessful iteration.
    #[serde(with = "seconds")]
    pub thread_timeout: Duration,

    /// Interval of full cache resyncs.
    #[serde(with = "seconds", rename = "reSyncPeriod")]
    pub resync_period: Duration,

    /// Maximum time [`Manager::shutdown`](crate::Manager::shutdown) waits for runtimes to stop.
    #[serde(with = "seconds")]
    pub shutdown_grace: Duration,

    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            thread_number: 1,
            controller_max_retry_times: 5,
            thread_timeout: Duration::from_secs(5),
            resync_period: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub log: LogConfig,
    /// Runtime settings.
    pub manager: ManagerConfig,
}

impl Config {
    /// Parses a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Looks for [`CONFIG_FILE_NAME`] in [`CONFIG_SEARCH_PATHS`] relative to `base`.
    ///
    /// Returns the defaults (and `None` as the source) when no file exists.
    pub fn discover(base: impl AsRef<Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let base = base.as_ref();
        for dir in CONFIG_SEARCH_PATHS {
            let candidate = base.join(dir).join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Self::from_file(&candidate).map(|cfg| (cfg, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Verbosity clamped to `1..=5`.
    #[inline]
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_verbosity(self.log.level)
    }

    /// Workers per runtime, at least one.
    #[inline]
    pub fn threads(&self) -> usize {
        self.manager.thread_number.max(1)
    }

    /// Requeue limit for failing keys.
    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.manager.controller_max_retry_times
    }

    /// Pause between worker-loop restarts.
    #[inline]
    pub fn worker_interval(&self) -> Duration {
        self.manager.thread_timeout
    }

    /// Resync interval, `None` when disabled.
    #[inline]
    pub fn resync(&self) -> Option<Duration> {
        Some(self.manager.resync_period).filter(|d| !d.is_zero())
    }

    /// Shutdown drain window.
    #[inline]
    pub fn grace(&self) -> Duration {
        self.manager.shutdown_grace
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.manager.bus_capacity.max(1)
    }
}

/// Durations written as whole seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level(), LogLevel::Info);
        assert_eq!(cfg.threads(), 1);
        assert_eq!(cfg.max_retries(), 5);
        assert_eq!(cfg.worker_interval(), Duration::from_secs(5));
        assert_eq!(cfg.resync(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let cfg = Config::from_yaml_str("manager:\n  threadNumber: 4\n  reSyncPeriod: 60\n").unwrap();
        assert_eq!(cfg.threads(), 4);
        assert_eq!(cfg.resync(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.max_retries(), 5);
        assert_eq!(cfg.log.level, 4);
    }

    #[test]
    fn verbosity_is_clamped() {
        assert_eq!(LogLevel::from_verbosity(-3), LogLevel::Fatal);
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Fatal);
        assert_eq!(LogLevel::from_verbosity(3), LogLevel::Warning);
        assert_eq!(LogLevel::from_verbosity(42), LogLevel::Debug);
        assert_eq!(LogLevel::Fatal.level_filter(), LevelFilter::ERROR);
        assert_eq!(LogLevel::Debug.level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn zero_sentinels() {
        let mut cfg = Config::default();
        cfg.manager.thread_number = 0;
        cfg.manager.resync_period = Duration::ZERO;
        cfg.manager.bus_capacity = 0;
        assert_eq!(cfg.threads(), 1);
        assert_eq!(cfg.resync(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn discover_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, source) = Config::discover(dir.path()).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(source.is_none());
    }

    #[test]
    fn discover_prefers_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config").join(CONFIG_FILE_NAME), "log:\n  level: 5\n").unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "log:\n  level: 2\n").unwrap();

        let (cfg, source) = Config::discover(dir.path()).unwrap();
        assert_eq!(cfg.log_level(), LogLevel::Debug);
        assert!(source.unwrap().ends_with("config/config.yaml"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "manager: [not, a, map]").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }
}
