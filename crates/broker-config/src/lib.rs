#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Configuration loading and logging setup for the broker.

mod logging;

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub use logging::init_logging;

const DEFAULT_CLIENTS_ADDRESS: &str = "*";
const DEFAULT_WORKERS_ADDRESS: &str = "*";
const DEFAULT_MONITOR_ADDRESS: &str = "127.0.0.1";
const DEFAULT_MONITOR_PORT: u16 = 7894;
const DEFAULT_MAX_WORKER_LIVENESS: i64 = 4;
const DEFAULT_WORKER_PING_INTERVAL_MS: u64 = 1000;
const DEFAULT_LOGGER_LEVEL: &str = "info";
const DEFAULT_LOGGER_MAX_SIZE: u64 = 1024 * 1024;
const DEFAULT_LOGGER_ROTATIONS: usize = 3;
const DEFAULT_NOTIFIER_PORT: u16 = 80;

/// Errors that can occur while loading the configuration document. Any of
/// these is a fatal startup failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents are not valid YAML, or don't match the expected shape.
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying deserialization error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A scalar with no default was missing from the document.
    #[error("missing required configuration key '{0}'")]
    MissingKey(&'static str),
}

/// A bind or connect address/port pair.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Address to bind or connect to.
    pub address: String,
    /// Port to bind or connect to.
    pub port: u16,
}

/// Logging sink configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Optional rotating log file path; stdout-only when absent.
    pub file: Option<PathBuf>,
    /// Minimum severity emitted.
    pub level: String,
    /// Size threshold (bytes) that triggers rotation, when `file` is set.
    pub max_size: u64,
    /// Number of rotated files retained, when `file` is set.
    pub rotations: usize,
}

/// Frontend HTTP status-reporting endpoint.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Frontend base address.
    pub address: String,
    /// Frontend port.
    pub port: u16,
    /// HTTP basic auth username, if required.
    pub username: Option<String>,
    /// HTTP basic auth password, if required.
    pub password: Option<String>,
}

/// The fully validated broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Client-facing socket.
    pub clients: EndpointConfig,
    /// Worker-facing socket.
    pub workers: EndpointConfig,
    /// Monitor socket (connected, not bound).
    pub monitor: EndpointConfig,
    /// Pings a worker may miss before being considered dead.
    pub max_worker_liveness: i64,
    /// Liveness decay period.
    pub worker_ping_interval_ms: u64,
    /// Logging sink configuration.
    pub logger: LoggerConfig,
    /// Frontend status-reporting endpoint.
    pub notifier: NotifierConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEndpoint {
    address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLogger {
    file: Option<PathBuf>,
    level: Option<String>,
    #[serde(rename = "max-size")]
    max_size: Option<u64>,
    rotations: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNotifier {
    address: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    clients: RawEndpoint,
    workers: RawEndpoint,
    monitor: RawEndpoint,
    max_worker_liveness: Option<i64>,
    worker_ping_interval_ms: Option<u64>,
    logger: RawLogger,
    notifier: RawNotifier,
}

impl BrokerConfig {
    /// Load and validate the broker configuration from a YAML document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            clients: EndpointConfig {
                address: raw.clients.address.unwrap_or_else(|| DEFAULT_CLIENTS_ADDRESS.to_string()),
                port: raw.clients.port.ok_or(ConfigError::MissingKey("clients.port"))?,
            },
            workers: EndpointConfig {
                address: raw.workers.address.unwrap_or_else(|| DEFAULT_WORKERS_ADDRESS.to_string()),
                port: raw.workers.port.ok_or(ConfigError::MissingKey("workers.port"))?,
            },
            monitor: EndpointConfig {
                address: raw.monitor.address.unwrap_or_else(|| DEFAULT_MONITOR_ADDRESS.to_string()),
                port: raw.monitor.port.unwrap_or(DEFAULT_MONITOR_PORT),
            },
            max_worker_liveness: raw.max_worker_liveness.unwrap_or(DEFAULT_MAX_WORKER_LIVENESS),
            worker_ping_interval_ms: raw.worker_ping_interval_ms.unwrap_or(DEFAULT_WORKER_PING_INTERVAL_MS),
            logger: LoggerConfig {
                file: raw.logger.file,
                level: raw.logger.level.unwrap_or_else(|| DEFAULT_LOGGER_LEVEL.to_string()),
                max_size: raw.logger.max_size.unwrap_or(DEFAULT_LOGGER_MAX_SIZE),
                rotations: raw.logger.rotations.unwrap_or(DEFAULT_LOGGER_ROTATIONS),
            },
            notifier: NotifierConfig {
                address: raw
                    .notifier
                    .address
                    .ok_or(ConfigError::MissingKey("notifier.address"))?,
                port: raw.notifier.port.unwrap_or(DEFAULT_NOTIFIER_PORT),
                username: raw.notifier.username,
                password: raw.notifier.password,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_worker_port_fails_to_load() {
        let raw: RawConfig = serde_yaml::from_str(
            "clients:\n  port: 9657\nworkers:\n  address: \"*\"\nnotifier:\n  address: http://localhost\n",
        )
        .unwrap();
        let err = BrokerConfig::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("workers.port")));
    }

    #[test]
    fn defaults_fill_in_optional_keys() {
        let raw: RawConfig = serde_yaml::from_str(
            "clients:\n  port: 9657\nworkers:\n  port: 9658\nnotifier:\n  address: http://localhost\n",
        )
        .unwrap();
        let config = BrokerConfig::from_raw(raw).unwrap();
        assert_eq!(config.clients.address, "*");
        assert_eq!(config.monitor.port, DEFAULT_MONITOR_PORT);
        assert_eq!(config.max_worker_liveness, DEFAULT_MAX_WORKER_LIVENESS);
        assert_eq!(config.worker_ping_interval_ms, DEFAULT_WORKER_PING_INTERVAL_MS);
        assert_eq!(config.logger.level, DEFAULT_LOGGER_LEVEL);
    }
}
