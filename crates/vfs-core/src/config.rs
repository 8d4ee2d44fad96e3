//! Settings consumed (read-only) by the VFS core.
//!
//! Reads a flat JSON settings file. Keys are accepted in camelCase or snake_case, and
//! dot-notation keys (like "thumbnails.maxBytes") written by settings stores are
//! recognized as well.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Read-only preferences shared by every directory and task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(alias = "thumbnailsEnabled", alias = "thumbnails.enabled")]
    pub thumbnails_enabled: bool,
    /// Thumbnail edge in pixels for list views.
    #[serde(alias = "thumbnailSizeSmall", alias = "thumbnails.sizeSmall")]
    pub thumbnail_size_small: u32,
    /// Thumbnail edge in pixels for icon views.
    #[serde(alias = "thumbnailSizeBig", alias = "thumbnails.sizeBig")]
    pub thumbnail_size_big: u32,
    /// Files larger than this are never thumbnailed.
    #[serde(alias = "maxThumbnailBytes", alias = "thumbnails.maxBytes")]
    pub max_thumbnail_bytes: u64,
    #[serde(alias = "iconSizeSmall")]
    pub icon_size_small: u32,
    #[serde(alias = "iconSizeBig")]
    pub icon_size_big: u32,
    #[serde(alias = "clickExecutes")]
    pub click_executes: bool,
    /// Delay between the first change notification of a batch and its delivery.
    #[serde(alias = "debounceMs", alias = "watcher.debounceMs")]
    pub debounce_ms: u64,
    /// Shorter delay used for forced (synchronous) updates.
    #[serde(alias = "forcedDebounceMs", alias = "watcher.forcedDebounceMs")]
    pub forced_debounce_ms: u64,
    #[serde(alias = "progressIntervalMs", alias = "tasks.progressIntervalMs")]
    pub progress_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thumbnails_enabled: true,
            thumbnail_size_small: 22,
            thumbnail_size_big: 48,
            max_thumbnail_bytes: 8 * 1024 * 1024,
            icon_size_small: 22,
            icon_size_big: 48,
            click_executes: false,
            debounce_ms: 200,
            forced_debounce_ms: 100,
            progress_interval_ms: 200,
        }
    }
}

/// Errors from reading a settings file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read settings: {e}"),
            ConfigError::Parse(e) => write!(f, "Failed to parse settings: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Parses settings JSON. Unknown keys are ignored, missing keys keep their defaults.
pub fn parse_settings(contents: &str) -> Result<Settings, ConfigError> {
    Ok(serde_json::from_str(contents)?)
}

/// Loads settings from `path`.
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Settings: can't read {}: {}", path.display(), e);
            }
            return Settings::default();
        }
    };
    match parse_settings(&contents) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Settings: {} ({}), using defaults", e, path.display());
            Settings::default()
        }
    }
}
