//! Configuration parsing and management for live2d-stage

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Live2dStageError};
use crate::live2d::registry::{self, ModelKind};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub live2d: Live2dConfig,
    pub characters: Vec<CharacterConfig>,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            live2d: Live2dConfig::default(),
            characters: registry::default_characters(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Live2dStageError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, Live2dStageError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, Live2dStageError> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Live2dStageError> {
        if self.live2d.canvas_width == 0 || self.live2d.canvas_height == 0 {
            return Err(invalid("live2d.canvas_width", "Canvas size must be greater than 0"));
        }

        if !(1..=240).contains(&self.live2d.frame_rate) {
            return Err(invalid("live2d.frame_rate", "Frame rate must be between 1 and 240"));
        }

        if self.live2d.memory_budget_mb == 0 {
            return Err(invalid(
                "live2d.memory_budget_mb",
                "Memory budget must be greater than 0",
            ));
        }

        if self.live2d.asset_url_prefix.trim_matches('/').is_empty() {
            return Err(invalid(
                "live2d.asset_url_prefix",
                "Asset URL prefix must name a path below /",
            ));
        }

        if let AssetSource::Http { base_url } = &self.live2d.source {
            if base_url.trim().is_empty() {
                return Err(invalid(
                    "live2d.source.base_url",
                    "Base URL is required for the http asset source",
                ));
            }
        }

        let mut names = HashSet::new();
        for (i, character) in self.characters.iter().enumerate() {
            if character.id.trim().is_empty() {
                return Err(invalid(
                    &format!("characters[{}].id", i),
                    "Speaker id must not be empty",
                ));
            }
            if !names.insert(character.name.as_str()) {
                return Err(invalid(
                    &format!("characters[{}].name", i),
                    &format!("Duplicate character name: {}", character.name),
                ));
            }
        }

        if let Some(ref default) = self.live2d.default_model {
            if !names.contains(default.as_str()) {
                tracing::warn!("Default model {} is not a configured character", default);
            }
        }

        if self.http.port == 0 {
            return Err(invalid("http.port", "Port must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Live2dStageError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Live2D viewer and asset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Live2dConfig {
    /// Directory containing the character model directories
    pub assets_dir: PathBuf,
    /// Where model bytes are read from
    pub source: AssetSource,
    /// URL path prefix the http source resolves model directories under
    pub asset_url_prefix: String,
    /// Working memory handed to the native viewer, in MiB
    pub memory_budget_mb: usize,
    /// Initial canvas width
    pub canvas_width: u32,
    /// Initial canvas height
    pub canvas_height: u32,
    /// Target render cadence in frames per second
    pub frame_rate: u32,
    /// Character made active once all loads are issued
    pub default_model: Option<String>,
}

impl Default for Live2dConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("./assets/live2d"),
            source: AssetSource::File,
            asset_url_prefix: "/assets".to_string(),
            memory_budget_mb: 32,
            canvas_width: 800,
            canvas_height: 800,
            frame_rate: 60,
            default_model: Some("四国めたん".to_string()),
        }
    }
}

impl Live2dConfig {
    /// Working memory budget in bytes
    pub fn memory_budget(&self) -> usize {
        self.memory_budget_mb * 1024 * 1024
    }

    /// Interval between render ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    /// Root the model directories are resolved against for the active source
    pub fn assets_root(&self) -> String {
        match self.source {
            AssetSource::File => self.assets_dir.to_string_lossy().into_owned(),
            AssetSource::Http { .. } => self.asset_url_prefix.clone(),
        }
    }
}

/// Asset byte source, selected by deployment mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetSource {
    /// Read from the local filesystem
    File,
    /// Fetch over HTTP from a base URL
    Http { base_url: String },
}

impl Default for AssetSource {
    fn default() -> Self {
        Self::File
    }
}

/// One entry of the character registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Display name, also the metadata store key
    pub name: String,
    /// Speaker id the model is registered under
    pub id: String,
    /// Model directory, relative to the assets root
    pub dir: String,
    /// Model json file name inside `dir`
    pub model_json: String,
    #[serde(default)]
    pub lip_sync_weight: Option<f32>,
    /// Model uses pre-4.0 parameter names
    #[serde(default)]
    pub legacy_param_names: bool,
    #[serde(default)]
    pub default_expression: Option<String>,
    #[serde(default)]
    pub kind: ModelKind,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable HTTP server
    pub enabled: bool,
    /// HTTP server host
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("live2d-stage");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/live2d-stage");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/live2d-stage");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("live2d-stage");
        }
    }

    PathBuf::from(".")
}
