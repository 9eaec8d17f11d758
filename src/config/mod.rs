/// Configuration management for the flowtest engine
///
/// Handles server configuration, the collection directory and run defaults.
/// Every value can be overridden through a `FLOWTEST_*` environment variable.

use crate::runtime::context::DEFAULT_TIMEOUT_MS;
use crate::runtime::engine::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Where `.flow` and environment files live
    pub collection: CollectionConfig,
    /// Defaults applied to every run
    pub run: RunConfig,
    /// Log filter
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "127.0.0.1")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Collection directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Directory holding `<name>.flow` files and `environments/<name>.env`
    pub dir: PathBuf,
}

/// Run defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Deadline for a run when the caller gives none
    pub timeout_ms: u64,
    /// Failed requests a run may absorb before failing
    pub request_failure_tolerance: u32,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            request_failure_tolerance: self.request_failure_tolerance,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. "info" or "flowtest_engine=debug"
    pub filter: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR overrides
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWTEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_or("FLOWTEST_PORT", 3005),
            },
            collection: CollectionConfig {
                dir: std::env::var("FLOWTEST_COLLECTION_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("flows")),
            },
            run: RunConfig {
                timeout_ms: env_or("FLOWTEST_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
                request_failure_tolerance: env_or("FLOWTEST_REQUEST_FAILURE_TOLERANCE", 0),
            },
            logging: LoggingConfig {
                filter: std::env::var("FLOWTEST_LOG").unwrap_or_else(|_| "info".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_conversions() {
        let run = RunConfig {
            timeout_ms: 1500,
            request_failure_tolerance: 2,
        };
        assert_eq!(run.timeout(), Duration::from_millis(1500));
        assert_eq!(run.executor_config().request_failure_tolerance, 2);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("FLOWTEST_TEST_UNSET_VARIABLE", 7u16), 7);
    }
}
