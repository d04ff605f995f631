//! Tracing initialization.
//!
//! Binaries call [`init_tracing`] once at startup and keep the returned [`LogFlusher`] alive
//! until exit. Tests call [`init_test_tracing`], which only installs a subscriber when
//! `ENABLE_TRACING` is set.

use std::io;
use std::sync::Once;

use etl_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Directory production log files are written to.
const LOGS_DIR: &str = "logs";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable that turns on log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to install the log bridge: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped.
///
/// In production logs go through a background writer, so dropping this guard before exit
/// is what guarantees the last lines reach the log file.
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber for a binary named `app_name`.
///
/// In `dev` logs are pretty printed to stdout. In `prod` they are written as JSON lines to a
/// daily rotated `logs/{app_name}.log` file. `log` records are forwarded to `tracing` in both.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let flusher = if environment.is_prod() {
        let file_appender = rolling::daily(LOGS_DIR, format!("{app_name}.log"));
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .try_init()?;

        LogFlusher {
            _guard: Some(guard),
        }
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer().pretty().with_target(true);

        tracing_subscriber::registry()
            .with(filter)
            .with(pretty_layer)
            .try_init()?;

        LogFlusher { _guard: None }
    };

    tracing::info!(app = app_name, %environment, "tracing initialized");

    Ok(flusher)
}

/// Installs a subscriber writing through the test harness, once per process.
///
/// Does nothing unless `ENABLE_TRACING` is set, so test output stays quiet by default.
pub fn init_test_tracing() {
    if std::env::var_os(ENABLE_TRACING_ENV_NAME).is_none() {
        return;
    }

    INIT_TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        // Another test binary helper may already have installed one.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
