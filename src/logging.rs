//! tracing subscriber setup.

use crate::config::JanitorConfig;
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Daemon and one-shot runs: log file plus stderr.
    FileAndStderr,
    /// Interactive session: the terminal belongs to the UI.
    FileOnly,
}

/// Keeps the non-blocking file writer flushing until dropped.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Failing to open the log file is reported on
/// stderr and degrades logging, it never stops the program.
pub fn init(cfg: &JanitorConfig, target: LogTarget) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_directive()));

    let (file_layer, guard) = match open_log(&cfg.log_file) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            let fallback = match target {
                LogTarget::FileAndStderr => "logging to stderr only",
                LogTarget::FileOnly => "logging disabled",
            };
            eprintln!(
                "docker-janitor: cannot open log file {}: {e}; {fallback}",
                cfg.log_file.display()
            );
            (None, None)
        }
    };

    let stderr_layer = (target == LogTarget::FileAndStderr).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    // A subscriber may already be installed (tests); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    LogGuard { _file: guard }
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
