//! Logging configuration and initialization for marketplace services
//!
//! - Console logging or daily rotating file logging
//! - Configurable log directory and file prefix
//! - Safe error handling for logging setup (never panics on a bad directory)

use anyhow::{Result, anyhow};
use std::env;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_FILE_PREFIX: &str = "marketplace";
const DEFAULT_LOG_FILTER: &str = "info";

/// Where log lines are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Console,
    File { dir: String, prefix: String },
}

/// Logging settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub destination: LogDestination,
    /// Fallback filter when RUST_LOG is unset or invalid
    pub default_filter: String,
}

impl LogConfig {
    /// Read logging settings
    ///
    /// ## Environment Variables
    ///
    /// - `LOG_DESTINATION`: "console" or "file" (default: "file")
    /// - `LOG_DIR`: directory for log files (default: "./logs"), file destination only
    /// - `LOG_FILE_PREFIX`: log file name prefix (default: "marketplace"), file destination only
    /// - `LOG_LEVEL`: filter used when RUST_LOG is not set (default: "info")
    pub fn from_env() -> Self {
        let destination = match env::var("LOG_DESTINATION")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "console" | "stdout" => LogDestination::Console,
            _ => LogDestination::File {
                dir: env::var("LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string()),
                prefix: env::var("LOG_FILE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_LOG_FILE_PREFIX.to_string()),
            },
        };

        Self {
            destination,
            default_filter: env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }

    pub fn console(default_filter: impl Into<String>) -> Self {
        Self {
            destination: LogDestination::Console,
            default_filter: default_filter.into(),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Keeps the non-blocking file writer alive; drop it only at process exit
#[must_use = "dropping the guard stops the log writer thread"]
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Initialize tracing from `LogConfig::from_env()`
///
/// ```rust,no_run
/// # async fn run() -> anyhow::Result<()> {
/// let _guard = monitoring::init_logging()?;
/// tracing::info!("ready");
/// # Ok(())
/// # }
/// ```
pub fn init_logging() -> Result<LoggingGuard> {
    init_logging_with(&LogConfig::from_env())
}

/// Initialize tracing with an explicit configuration
pub fn init_logging_with(config: &LogConfig) -> Result<LoggingGuard> {
    let env_filter = config.env_filter();

    match &config.destination {
        LogDestination::Console => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(true)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize console tracing subscriber: {}", e))?;

            info!("Logging to console (stderr)");
            Ok(LoggingGuard { _worker: None })
        }
        LogDestination::File { dir, prefix } => {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("Failed to create log directory '{}': {}", dir, e))?;

            let file_appender = rolling::daily(dir, prefix);
            let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize file tracing subscriber: {}", e))?;

            info!("Logging to daily rotating files in: {}/", dir);
            info!("Log file pattern: {}/{}.<YYYY-MM-DD>", dir, prefix);

            Ok(LoggingGuard { _worker: Some(worker) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_config() {
        let config = LogConfig::console("debug");
        assert_eq!(config.destination, LogDestination::Console);
        assert_eq!(config.default_filter, "debug");
    }

    #[test]
    fn test_init_with_invalid_directory() {
        let invalid_path = if cfg!(windows) {
            "Z:\\nonexistent\\deeply\\nested\\invalid\\path"
        } else {
            "/proc/nonexistent/deeply/nested/invalid/path"
        };

        let config = LogConfig {
            destination: LogDestination::File {
                dir: invalid_path.to_string(),
                prefix: "test-log".to_string(),
            },
            default_filter: "info".to_string(),
        };

        // Must fail gracefully, not panic
        let result = init_logging_with(&config);
        assert!(result.is_err());
        assert!(
            result
                .err()
                .map(|e| e.to_string().contains("Failed to create log directory"))
                .unwrap_or(false)
        );
    }
}
