//! Tracing configuration and log routing.
//!
//! Human-readable logs go to stderr so that stdout stays reserved for extraction results. A
//! second, ANSI-free layer appends to a log file: the path given on the command line, else
//! `IDU_LOG_FILE`, else `logs/rustyidu.log`. File output goes through a non‑blocking writer.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "rustyidu.log";

/// Knobs exposed to binaries when installing the global subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Explicit log file; falls back to `IDU_LOG_FILE` and then `logs/rustyidu.log`.
    pub log_file: Option<PathBuf>,
    /// Lower the default filter to `debug` when `RUST_LOG` is unset.
    pub verbose: bool,
    /// Skip the file layer entirely.
    pub disable_file: bool,
}

/// Configure tracing subscribers for stderr and optional file logging.
///
/// `RUST_LOG` always wins over the verbosity flag.
pub fn init_tracing(options: &LoggingOptions) {
    let default_level = if options.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let writer = if options.disable_file {
        None
    } else {
        let path = log_file_path(options, |key| std::env::var_os(key));
        configure_file_writer(path.as_deref())
    };

    match writer {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Log file requested by the options or the environment. `.env` must already be loaded for
/// an `IDU_LOG_FILE` set there to apply.
fn log_file_path<F>(options: &LoggingOptions, lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<std::ffi::OsString>,
{
    options
        .log_file
        .clone()
        .or_else(|| lookup("IDU_LOG_FILE").map(PathBuf::from))
}

/// Build a non‑blocking writer for file logging.
///
/// Returns `None` when the target file or the default logs directory cannot be opened.
fn configure_file_writer(path: Option<&Path>) -> Option<NonBlocking> {
    let (non_blocking, guard) = match path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        None => {
            std::fs::create_dir_all(DEFAULT_LOG_DIR)
                .map_err(|err| eprintln!("Failed to create logs directory: {err}"))
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                DEFAULT_LOG_DIR,
                DEFAULT_LOG_FILE,
            ))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
