//! Configuration persistence
//!
//! Stored as JSON in `<config dir>/cadenza/config.json`. Every field has a
//! default, so a missing file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::theme::{to_hex, Palette};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub grid: GridConfig,
    pub seekbar: SeekbarConfig,
    pub theme: ThemeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub client_name: String,
    pub api_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            client_name: "cadenza".to_string(),
            api_version: "1.16.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Albums requested when a grid is created
    pub initial_fetch: usize,
    pub page_size: usize,
    pub prefetch_window: usize,
    /// Requested cover edge length in pixels
    pub thumbnail_size: u32,
    pub thumbnail_memory_entries: usize,
    /// `getAlbumList2` type, e.g. "newest", "random", "alphabeticalByName"
    pub list_kind: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            initial_fetch: crate::INITIAL_FETCH,
            page_size: crate::PAGE_SIZE,
            prefetch_window: crate::PREFETCH_WINDOW,
            thumbnail_size: 300,
            thumbnail_memory_entries: 500,
            list_kind: "newest".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeekbarConfig {
    pub width: u32,
    pub height: u32,
    pub keyboard_step: f64,
}

impl Default for SeekbarConfig {
    fn default() -> Self {
        Self {
            width: crate::WAVEFORM_WIDTH,
            height: crate::WAVEFORM_HEIGHT,
            keyboard_step: crate::KEYBOARD_SEEK_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    pub played: String,
    pub unplayed: String,
    pub focus: String,
    /// Derive the played color from the now-playing cover
    pub accent_from_art: bool,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        let p = Palette::default();
        Self {
            played: to_hex(p.played),
            unplayed: to_hex(p.unplayed),
            focus: to_hex(p.focus),
            accent_from_art: true,
        }
    }
}

impl ThemeConfig {
    pub fn palette(&self) -> Result<Palette, ConfigError> {
        Palette::from_hex(&self.played, &self.unplayed, &self.focus)
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if the file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                log::warn!("ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadenza")
            .join("config.json")
    }

    /// Directory for downloaded cover art
    pub fn cover_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadenza")
            .join("covers")
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        // reject bad colors up front rather than at first repaint
        config.theme.palette()?;
        Ok(config)
    }
}
