//! Logging setup.
//!
//! Two layers on one `tracing-subscriber` registry:
//!
//! - stderr, human readable (stdout belongs to the tool protocol)
//! - JSON file, rolled daily, under the platform data directory
//!
//! Both honour `RUST_LOG` and default to `info`.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file name prefix; the appender adds the date.
pub const LOG_FILE_NAME: &str = "okta-session.log";

const DEFAULT_FILTER: &str = "info";

/// Directory log files are written to.
pub fn log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("okta-session").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system.
///
/// Returns a `WorkerGuard` which must be kept alive for the duration of the
/// process so buffered file output is flushed on shutdown. Calling this twice
/// leaves the first subscriber in place.
pub fn init() -> WorkerGuard {
    let log_dir = log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create logs directory {}: {e}", log_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File Layer: JSON format for easy parsing/ingestion
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_filter(env_filter());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    if let Err(e) = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
    {
        eprintln!("Logging already initialized: {e}");
        return guard;
    }

    info!(
        path = %log_dir.join(LOG_FILE_NAME).display(),
        version = crate::VERSION,
        "Logging initialized (daily rolling)"
    );

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_namespaced() {
        let dir = log_dir();
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
