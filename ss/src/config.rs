//! SsrSync configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::head::HEAD_ANCHOR;
use ssrdata::{DATA_ANCHOR, DEFAULT_MAX_PASSES};

/// Main SsrSync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Payload element ids
    pub hydration: HydrationConfig,

    /// Reference host limits
    pub render: RenderConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ssrsync.yml
        let local_config = PathBuf::from(".ssrsync.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ssrsync/ssrsync.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ssrsync").join("ssrsync.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from whichever config file would be loaded, if it sets one
    ///
    /// Runs before logging is set up, so failures are silently ignored.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Payload element ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    /// Id of the data payload script
    #[serde(rename = "data-anchor")]
    pub data_anchor: String,

    /// Id of the head payload script
    #[serde(rename = "head-anchor")]
    pub head_anchor: String,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            data_anchor: DATA_ANCHOR.to_string(),
            head_anchor: HEAD_ANCHOR.to_string(),
        }
    }
}

/// Reference host limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render rounds allowed before a pass is abandoned
    #[serde(rename = "max-passes")]
    pub max_passes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.hydration.data_anchor, "__NEXT_DATA_PROMISE__");
        assert_eq!(config.hydration.head_anchor, "__REMIX_HEAD_VALUE__");
        assert_eq!(config.render.max_passes, DEFAULT_MAX_PASSES);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "log-level: DEBUG\nhydration:\n  data-anchor: __DATA__\n").unwrap();
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(config.hydration.data_anchor, "__DATA__");
        assert_eq!(config.hydration.head_anchor, HEAD_ANCHOR);
        assert_eq!(config.render.max_passes, DEFAULT_MAX_PASSES);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let missing = PathBuf::from("/nonexistent/ssrsync.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "render: [not, a, map]").unwrap();
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());
    }
}
