//! Configuration file support.
//!
//! Settings are read from `<config_dir>/runalyzer/config.toml` when it
//! exists:
//!
//! ```toml
//! mangle = true
//! format = "table"
//! history_file = "/home/me/.runalyzerhist"
//! log_filter = "runalyzer=info"
//! ```
//!
//! Every key is optional. Command-line flags take precedence.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RunalyzerError, RunalyzerResult};
use crate::output::OutputFormat;
use crate::session::Mode;

pub const DEFAULT_LOG_FILTER: &str = "runalyzer=warn";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Expand magic columns in queries.
    pub mangle: bool,
    pub format: OutputFormat,
    /// Console history file. Defaults to `~/.runalyzerhist`.
    pub history_file: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mangle: true,
            format: OutputFormat::Table,
            history_file: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> RunalyzerResult<Self> {
        toml::from_str(content).map_err(|e| RunalyzerError::Config(e.to_string()))
    }

    /// Load configuration from `path`.
    pub fn load(path: &Path) -> RunalyzerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| RunalyzerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the user configuration file, or defaults if there is none.
    pub fn load_default() -> RunalyzerResult<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn mode(&self) -> Mode {
        if self.mangle {
            Mode::Expanded
        } else {
            Mode::Literal
        }
    }

    /// The console history file, if a location can be determined.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| dirs::home_dir().map(|p| p.join(".runalyzerhist")))
    }
}

/// `<config_dir>/runalyzer/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("runalyzer").join("config.toml"))
}
