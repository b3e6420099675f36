use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::drain::{CaptureOptions, DEFAULT_BUFFER_SIZE, DEFAULT_POLL_INTERVAL};
use crate::framing::Framing;
use crate::severity::Severity;
use crate::stream::{StreamDescriptor, default_streams};

/// Persisted configuration: capture tuning, stream table, logging.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Empty means stdout and stderr with their default tags.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub buffer_size: usize,
    pub framing: Framing,
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            framing: Framing::Chunk,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub fd: i32,
    pub tag: String,
    pub severity: Severity,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
    /// Append log output here instead of the original stderr.
    pub file: Option<PathBuf>,
}

impl Config {
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            buffer_size: self.capture.buffer_size,
            framing: self.capture.framing,
            poll_interval: Duration::from_millis(self.capture.poll_interval_ms),
        }
    }

    pub fn stream_descriptors(&self) -> Vec<StreamDescriptor> {
        if self.streams.is_empty() {
            return default_streams();
        }
        self.streams
            .iter()
            .map(|s| StreamDescriptor::new(s.fd, s.tag.clone(), s.severity))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.buffer_size < 2 {
            anyhow::bail!(
                "capture.buffer_size must be at least 2 (got {})",
                self.capture.buffer_size
            );
        }
        if self.capture.poll_interval_ms == 0 {
            anyhow::bail!("capture.poll_interval_ms must be greater than 0");
        }
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.fd < 0 {
                anyhow::bail!("stream '{}' has negative fd {}", stream.tag, stream.fd);
            }
            if stream.tag.trim().is_empty() {
                anyhow::bail!("stream on fd {} has an empty tag", stream.fd);
            }
            if !seen.insert(stream.fd) {
                anyhow::bail!("fd {} is listed more than once", stream.fd);
            }
        }
        Ok(())
    }
}

/// Return the path to the config file:
/// `$XDG_CONFIG_HOME/stdiocap/config.toml` (default `~/.config/stdiocap/config.toml`).
pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stdiocap/config.toml")
}

/// Load the config from the default path. Missing or invalid files give defaults.
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Config {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Config::default(),
    };
    toml::from_str(&content).unwrap_or_default()
}

/// Like [`load_config_from`] but reports unreadable or malformed files.
pub fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Save the config, creating parent directories as needed.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}
