//! Display preferences persisted between runs.
//!
//! Only the dark-mode setting exists today. It is stored as a small JSON
//! document, e.g. `{"dark_mode": "USE_SYSTEM"}`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

/// Dark-mode setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DarkMode {
    Enabled,
    Disabled,
    /// Follow the operating system's color scheme.
    #[default]
    UseSystem,
}

impl DarkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DarkMode::Enabled => "ENABLED",
            DarkMode::Disabled => "DISABLED",
            DarkMode::UseSystem => "USE_SYSTEM",
        }
    }

    /// Whether the dark theme should be shown.
    pub fn is_dark(self, system_prefers_dark: bool) -> bool {
        match self {
            DarkMode::Enabled => true,
            DarkMode::Disabled => false,
            DarkMode::UseSystem => system_prefers_dark,
        }
    }

    /// The explicit setting that flips the currently effective theme.
    pub fn toggled(self, system_prefers_dark: bool) -> Self {
        if self.is_dark(system_prefers_dark) {
            DarkMode::Disabled
        } else {
            DarkMode::Enabled
        }
    }
}

impl std::fmt::Display for DarkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DarkMode {
    type Err = Error;

    /// Accepts the stored spellings case-insensitively, plus `system`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENABLED" => Ok(DarkMode::Enabled),
            "DISABLED" => Ok(DarkMode::Disabled),
            "USE_SYSTEM" | "SYSTEM" => Ok(DarkMode::UseSystem),
            _ => Err(Error::config(format!("unknown dark mode '{s}'"))),
        }
    }
}

/// Everything persisted in the preference file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: DarkMode,
}

/// JSON-file-backed preference storage.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load preferences, falling back to defaults when the file is missing
    /// or cannot be parsed.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Preferences {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preference file, using defaults");
                return Preferences::default();
            }
            Err(e) => {
                warn!(error = %e, "Failed to read preference file, using defaults");
                return Preferences::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to parse preference file, using defaults");
            Preferences::default()
        })
    }

    /// Write preferences, replacing the file atomically.
    #[instrument(skip(self, prefs), fields(path = %self.path.display()))]
    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(prefs)?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        debug!(dark_mode = %prefs.dark_mode, "Preferences saved");
        Ok(())
    }

    pub fn dark_mode(&self) -> DarkMode {
        self.load().dark_mode
    }

    pub fn set_dark_mode(&self, mode: DarkMode) -> Result<()> {
        let mut prefs = self.load();
        prefs.dark_mode = mode;
        self.save(&prefs)
    }
}
