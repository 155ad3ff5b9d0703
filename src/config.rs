/// Configuration module for actormatch.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matcher::{DEFAULT_TOP_K, MAX_TOP_K};

// ── Default value functions ──────────────────────────────────────────

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_model_name() -> String {
    "clip-vit-base-patch32".to_string()
}

fn default_dimensions() -> usize {
    512
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory holding the persisted index file pair and thumbnails.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding the ONNX model; defaults to `models/<model name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Results returned when a request carries no `top_k`. The supported
    /// range itself is fixed by the query surface ([1, 10]), not by config.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Per-batch bound on concurrent embedding calls.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model_dir: None,
            host: default_host(),
            port: default_port(),
            default_top_k: default_top_k(),
            batch_concurrency: default_batch_concurrency(),
            embed_timeout_secs: default_embed_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .map_err(|e| anyhow::anyhow!("failed to write config {path}: {e}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.port > 0, "port must be positive");
        anyhow::ensure!(
            (1..=MAX_TOP_K).contains(&self.default_top_k),
            "default_top_k must be between 1 and {MAX_TOP_K}"
        );
        anyhow::ensure!(
            self.batch_concurrency > 0,
            "batch_concurrency must be positive"
        );
        anyhow::ensure!(
            self.embed_timeout_secs > 0,
            "embed_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.max_upload_bytes > 0,
            "max_upload_bytes must be positive"
        );
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        Ok(())
    }

    /// Effective model directory: configured path or `models/<model name>`.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        match &self.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("models").join(&self.model.name),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.port, 8000);
        assert_eq!(config.default_top_k, 3);
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.model.name, "clip-vit-base-patch32");
        assert_eq!(config.model.dimensions, 512);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"port": 9000, "data_dir": "./catalog"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, "./catalog");
        // Other fields should have defaults
        assert_eq!(config.default_top_k, 3);
        assert_eq!(config.model.dimensions, 512);
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_top_k() {
        let mut config = Config::default();
        config.default_top_k = 0;
        assert!(config.validate().is_err());

        // Above the fixed query-surface range, not just above the default
        config.default_top_k = 20;
        assert!(config.validate().is_err());

        config.default_top_k = MAX_TOP_K;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_concurrency() {
        let mut config = Config::default();
        config.batch_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_dir_default_and_override() {
        let config = Config::default();
        assert_eq!(
            config.model_dir(),
            PathBuf::from("models/clip-vit-base-patch32")
        );

        let mut config = Config::default();
        config.model_dir = Some("/opt/models/clip".to_string());
        assert_eq!(config.model_dir(), PathBuf::from("/opt/models/clip"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.port, config.port);
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.model.name, config.model.name);
    }
}
