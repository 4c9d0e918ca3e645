use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_DIRECTORY: &str = "downloads";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub workers: Option<usize>,
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub download: DownloadConfig,
    /// Per-handler option presets, `[options.<handler>]`.
    options: HashMap<String, HashMap<String, toml::Value>>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> LogFormat {
        self.logging.format
    }

    pub fn workers(&self) -> usize {
        self.download.workers.unwrap_or(DEFAULT_WORKERS)
    }

    pub fn directory(&self) -> PathBuf {
        self.download
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIRECTORY))
    }

    /// Option presets with every value rendered as a string.
    pub fn presets(&self) -> HashMap<String, HashMap<String, String>> {
        self.options
            .iter()
            .map(|(handler, values)| {
                let values = values
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            toml::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), value)
                    })
                    .collect();
                (handler.clone(), values)
            })
            .collect()
    }
}

/// Locate the config file: explicit path, `SITEGRAB_CONFIG`, then the XDG
/// and home config directories.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("SITEGRAB_CONFIG") {
        return Some(PathBuf::from(path));
    }

    let candidates = [
        std::env::var("XDG_CONFIG_HOME").ok().map(PathBuf::from),
        dirs::home_dir().map(|home| home.join(".config")),
    ];

    candidates
        .into_iter()
        .flatten()
        .map(|dir| dir.join("sitegrab").join("config.toml"))
        .find(|path| path.exists())
}
