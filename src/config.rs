use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const FONT_SIZE_RANGE: (u32, u32) = (8, 20);
pub const WIDGET_HEIGHT_RANGE: (u32, u32) = (100, 500);

const DEFAULT_FONT_SIZE: u32 = 12;
const DEFAULT_WIDGET_HEIGHT: u32 = 280;
const DEFAULT_FOLDER_NAME: &str = "generated_images";

/// User settings for auto-save and the metadata panel. Passed explicitly to
/// the components that need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auto_save_enabled: bool,
    pub auto_save_folder: PathBuf,
    pub show_metadata_interface: bool,
    pub metadata_font_size: u32,
    pub metadata_widget_height: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_save_enabled: false,
            auto_save_folder: default_auto_save_folder(),
            show_metadata_interface: true,
            metadata_font_size: DEFAULT_FONT_SIZE,
            metadata_widget_height: DEFAULT_WIDGET_HEIGHT,
        }
    }
}

impl Settings {
    /// Defaults overridden by `.env` and process environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::default();
        settings.apply_overrides(|key| env::var(key).ok());
        settings
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = lookup("AUTO_SAVE_ENABLED").and_then(|value| parse_flag(&value)) {
            self.auto_save_enabled = value;
        }
        if let Some(value) = lookup("AUTO_SAVE_FOLDER") {
            self.auto_save_folder = PathBuf::from(value.trim());
        }
        if let Some(value) = lookup("SHOW_METADATA_INTERFACE").and_then(|value| parse_flag(&value)) {
            self.show_metadata_interface = value;
        }
        if let Some(value) = lookup("METADATA_FONT_SIZE").and_then(|value| value.trim().parse().ok()) {
            self.set_metadata_font_size(value);
        }
        if let Some(value) = lookup("METADATA_WIDGET_HEIGHT").and_then(|value| value.trim().parse().ok()) {
            self.set_metadata_widget_height(value);
        }
    }

    /// Reads settings from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("read settings {}", path.display())),
        };
        let mut settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse settings {}", path.display()))?;
        settings.clamp();
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write settings {}", path.display()))?;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_metadata_font_size(&mut self, size: u32) {
        self.metadata_font_size = size.clamp(FONT_SIZE_RANGE.0, FONT_SIZE_RANGE.1);
    }

    pub fn set_metadata_widget_height(&mut self, height: u32) {
        self.metadata_widget_height = height.clamp(WIDGET_HEIGHT_RANGE.0, WIDGET_HEIGHT_RANGE.1);
    }

    fn clamp(&mut self) {
        self.set_metadata_font_size(self.metadata_font_size);
        self.set_metadata_widget_height(self.metadata_widget_height);
    }
}

pub fn default_auto_save_folder() -> PathBuf {
    let mut base = dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.push(DEFAULT_FOLDER_NAME);
    base
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
