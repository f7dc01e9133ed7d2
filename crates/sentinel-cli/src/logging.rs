use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "warn,sentinel_core=info,sentinel_cli=info";
const DEFAULT_LOG_FILE: &str = "./logs/sentinel.log";

/// Split a log file path into the directory the appender writes to and the
/// file name prefix it rotates under.
fn log_target(path: &str) -> (PathBuf, String) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sentinel.log".to_string());
    (dir, name)
}

/// Console output goes to stderr so `--json` reports on stdout stay clean.
/// The file layer rotates daily; keep the returned guard alive until exit.
pub fn init_logger() -> impl Drop {
    let filter = env::var("SENTINEL_LOG")
        .or_else(|_| env::var("TRACING_LEVEL"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter_layer = EnvFilter::new(filter);

    let log_file = env::var("SENTINEL_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    let (dir, name) = log_target(&log_file);
    let file_appender = tracing_appender::rolling::daily(&dir, &name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(filter_layer)
        .init();

    debug!("Logging to {}", dir.join(&name).display());

    guard
}
