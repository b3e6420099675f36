use anyhow::{Context, Result};
use crossterm::style::{self, Stylize};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use stdiocap::config::{self, Config};
use stdiocap::{Framing, RedirectionManager, Severity, TracingSink, logging};

/// Settings from the command line that override the config file.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub log_file: Option<PathBuf>,
    pub framing: Option<Framing>,
    pub buffer_size: Option<usize>,
}

/// Read `path` if given (errors are reported), else the default config
/// (missing or broken files fall back to defaults).
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::read_config(p),
        None => Ok(config::load_config()),
    }
}

fn apply(config: &mut Config, overrides: RunOverrides) {
    if let Some(file) = overrides.log_file {
        config.log.file = Some(file);
    }
    if let Some(framing) = overrides.framing {
        config.capture.framing = framing;
    }
    if let Some(size) = overrides.buffer_size {
        config.capture.buffer_size = size;
    }
}

/// Exit code a shell would report for `status`.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Run `command` with the configured streams captured; returns its exit code.
pub fn cmd_run(config_path: Option<PathBuf>, overrides: RunOverrides, command: Vec<String>) -> Result<i32> {
    let mut config = load(config_path.as_deref())?;
    apply(&mut config, overrides);
    config.validate()?;

    let (program, args) = command.split_first().context("No command given")?;

    // Logging first: its writer must not be one of the captured descriptors.
    logging::init(&config.log)?;

    let mut manager = RedirectionManager::new(config.capture_options(), Arc::new(TracingSink));
    manager
        .activate(&config.stream_descriptors())
        .context("Failed to capture stdio")?;

    let status = Command::new(program).args(args).status();

    let reports = manager.shutdown().context("Failed to restore stdio")?;
    for report in &reports {
        tracing::debug!(
            stream = %report.tag,
            records = report.records,
            bytes = report.bytes,
            exit = ?report.exit,
            "stream summary"
        );
    }

    let status = status.with_context(|| format!("Failed to run {}", program))?;
    let code = exit_code(status);
    tracing::info!(command = %program, code, "command finished");
    Ok(code)
}

fn severity_color(severity: Severity) -> style::Color {
    match severity {
        Severity::Unknown | Severity::Verbose | Severity::Debug => style::Color::DarkGrey,
        Severity::Info => style::Color::Green,
        Severity::Warn => style::Color::Yellow,
        Severity::Error | Severity::Fatal => style::Color::Red,
    }
}

pub fn cmd_streams(config_path: Option<PathBuf>) -> Result<()> {
    let config = load(config_path.as_deref())?;
    config.validate()?;
    let opts = config.capture_options();

    println!("Captured streams:");
    println!();
    for desc in config.stream_descriptors() {
        println!(
            "  [fd {}] {:<20} {}",
            desc.target_fd,
            desc.tag,
            desc.severity.to_string().with(severity_color(desc.severity))
        );
    }
    println!();
    println!(
        "{}",
        format!(
            "buffer {} bytes, framing {}, poll {} ms",
            opts.buffer_size,
            opts.framing,
            opts.poll_interval.as_millis()
        )
        .with(style::Color::DarkGrey)
    );
    match &config.log.file {
        Some(path) => println!("{}", format!("log file: {}", path.display()).with(style::Color::DarkGrey)),
        None => println!("{}", "log file: (stderr)".with(style::Color::DarkGrey)),
    }

    Ok(())
}

pub fn cmd_config_path() -> Result<()> {
    let path = config::config_path();
    let note = if path.exists() { "exists" } else { "not found, using defaults" };
    println!("{} {}", path.display(), format!("({})", note).with(style::Color::DarkGrey));
    Ok(())
}
