use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::matcher::{DEFAULT_HIGH_CONFIDENCE, DEFAULT_MINIMUM_CONFIDENCE};

const SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding the LLM router URL
pub const ENV_LLM_URL: &str = "EMERGENCY_SCAN_LLM_URL";
/// Environment variable overriding the LLM router API key
pub const ENV_API_KEY: &str = "EMERGENCY_SCAN_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,

    // LLM router
    pub llm_router_url: String,
    pub llm_api_key: String,
    pub llm_client_id: String,
    pub vision_model: String,
    pub request_timeout_secs: u64,

    // Match policy thresholds (0-100)
    pub high_confidence_threshold: f32,
    pub minimum_confidence_threshold: f32,

    // Capture
    pub jpeg_quality: u8,
    pub mirror_capture: bool,

    /// Roster file; defaults to ~/.emergencyscan/roster.json
    pub roster_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            llm_router_url: "http://localhost:4000".to_string(),
            llm_api_key: String::new(),
            llm_client_id: "emergency-scan".to_string(),
            vision_model: "vision-model".to_string(),
            request_timeout_secs: 60,
            high_confidence_threshold: DEFAULT_HIGH_CONFIDENCE,
            minimum_confidence_threshold: DEFAULT_MINIMUM_CONFIDENCE,
            jpeg_quality: 85,
            mirror_capture: true,
            roster_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".emergencyscan"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location or return default
    pub fn load_or_default() -> Self {
        match Self::config_path().and_then(|path| Self::load_from_path(&path)) {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from file, or default if the file does not exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            let config: Config =
                serde_json::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_path()?)
    }

    /// Save config to file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Apply environment overrides for the router URL and API key
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_LLM_URL).ok(),
            std::env::var(ENV_API_KEY).ok(),
        );
    }

    fn apply_overrides(&mut self, url: Option<String>, api_key: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            debug!("LLM router URL overridden from environment");
            self.llm_router_url = url;
        }
        if let Some(key) = api_key {
            self.llm_api_key = key;
        }
    }

    /// Check that thresholds and capture settings are usable
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("high_confidence_threshold", self.high_confidence_threshold),
            ("minimum_confidence_threshold", self.minimum_confidence_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be within 0-100, got {}", name, value);
            }
        }
        if self.minimum_confidence_threshold > self.high_confidence_threshold {
            bail!(
                "minimum_confidence_threshold ({}) must not exceed high_confidence_threshold ({})",
                self.minimum_confidence_threshold,
                self.high_confidence_threshold
            );
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            bail!("jpeg_quality must be within 1-100, got {}", self.jpeg_quality);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.vision_model.trim().is_empty() {
            bail!("vision_model must not be empty");
        }
        Ok(())
    }

    /// Get the roster file path
    pub fn get_roster_path(&self) -> Result<PathBuf> {
        match self.roster_path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("roster.json")),
        }
    }
}
