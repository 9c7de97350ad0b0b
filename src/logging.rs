//! Tracing setup. Headless modes log to stderr; the TUI owns the terminal, so
//! it logs to a file instead.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub(crate) enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// `<cache dir>/vproc/vproc.log`, when the platform has a cache dir.
pub(crate) fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("vproc").join("vproc.log"))
}

/// `RUST_LOG` wins over `--log-level`.
fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}")),
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log dir {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

pub(crate) fn init(level: &str, target: LogTarget) -> Result<()> {
    let filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    match target {
        LogTarget::Stderr => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogTarget::File(path) => {
            let file = open_log_file(&path)?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
    }
    .context("failed to install log subscriber")
}
