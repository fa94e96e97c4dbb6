//! Configuration directory handling for Mailpilot
//!
//! All Mailpilot components share one config directory
//! (`~/.config/mailpilot/` by default). Stored credentials, OAuth client
//! secrets and the assistant settings file all live there.
//!
//! Call [`init`] at application startup to bootstrap the directory.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable that relocates the config directory
pub const CONFIG_DIR_ENV: &str = "MAILPILOT_CONFIG_DIR";

const APP_DIR_NAME: &str = "mailpilot";

/// A config directory rooted at a concrete path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Use an explicit directory (tests, portable installs)
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the default directory, honoring `MAILPILOT_CONFIG_DIR`
    pub fn resolve() -> Option<Self> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Some(Self::at(dir));
        }
        dirs::config_dir().map(|p| Self::at(p.join(APP_DIR_NAME)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to a file inside the directory
    pub fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.path(filename).exists()
    }

    /// Create the directory if it doesn't exist
    pub fn ensure(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("Failed to create config directory: {}", self.root.display())
        })?;
        Ok(&self.root)
    }

    /// Load and parse a JSON file from the directory
    pub fn load_json<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        load_json_file(&self.path(filename))
    }

    /// Load a JSON file, or `None` when it doesn't exist
    pub fn load_json_opt<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.exists(filename) {
            return Ok(None);
        }
        self.load_json(filename).map(Some)
    }

    /// Save a value as pretty JSON, creating the directory first
    pub fn save_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        self.ensure()?;
        let path = self.path(filename);
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }
}

/// Initialize the default config directory.
///
/// Creates it if it doesn't exist. Call this once at application startup.
pub fn init() -> Result<ConfigDir> {
    let dir = ConfigDir::resolve().context("Could not determine config directory")?;
    dir.ensure()?;
    Ok(dir)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}
