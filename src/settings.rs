//! "Last used settings": the most recent source/target/mode, remembered so a
//! front end can pre-fill its form.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "last-settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSettings {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub is_move: bool,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when nothing was saved yet or the file is unreadable.
    pub fn load(&self) -> Option<LastSettings> {
        match self.read() {
            Ok(settings) => Some(settings),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No usable saved settings");
                None
            }
        }
    }

    /// Returns whether the settings reached disk.
    pub fn save(&self, settings: &LastSettings) -> bool {
        match self.write(settings) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to save settings");
                false
            }
        }
    }

    fn read(&self) -> Result<LastSettings> {
        let content = fs::read_to_string(&self.path).context("Failed to read settings")?;
        serde_json::from_str(&content).context("Failed to parse settings")
    }

    fn write(&self, settings: &LastSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        fs::write(&self.path, json).context("Failed to write settings")
    }
}
