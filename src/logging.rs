use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::redirect::dup_cloexec;

/// A private handle on whatever stderr points at right now.
///
/// Taken before capture starts, it keeps writing to the terminal after fd 2
/// has been redirected into a pipe.
pub fn original_stderr() -> io::Result<File> {
    dup_cloexec(libc::STDERR_FILENO).map(File::from)
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log dir: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

fn build_filter(log: &LogConfig) -> Result<EnvFilter> {
    let directive = match std::env::var("RUST_LOG") {
        Ok(env) if !env.trim().is_empty() => env,
        _ => log.filter.clone().unwrap_or_else(|| "info".to_string()),
    };
    EnvFilter::try_new(&directive).with_context(|| format!("Invalid log filter: {}", directive))
}

/// Install the global `tracing` subscriber.
///
/// Output goes to `log.file` when set, otherwise to a duplicate of the
/// current stderr. Must run before capture is activated so neither
/// destination is one of the captured descriptors.
pub fn init(log: &LogConfig) -> Result<()> {
    let filter = build_filter(log)?;
    let (writer, ansi) = match &log.file {
        Some(path) => (open_log_file(path)?, false),
        None => {
            let stderr = original_stderr().context("Failed to duplicate stderr")?;
            let ansi = stderr.is_terminal();
            (stderr, ansi)
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(writer))
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}
