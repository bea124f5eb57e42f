/// Configuration module for the BGE-M3 embedder.
///
/// Handles loading, validating, and providing default configuration values.
/// The field layout (`model`, `model_kwargs.*`) matches what memory stores
/// pass to their embedders, so an existing embedder section can be reused.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// HuggingFace model identifier used when none is configured.
pub const DEFAULT_MODEL: &str = "BAAI/bge-m3";

// ── Default value functions ──────────────────────────────────────────

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_max_length() -> usize {
    8192
}

fn default_batch_size() -> usize {
    256
}

fn default_intra_threads() -> usize {
    4
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbedderConfig {
    /// HuggingFace repository id of the model.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub model_kwargs: ModelKwargs,

    /// Batch size used when the caller doesn't pass one.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    /// Defaults to a per-model directory under the platform cache dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub auto_download: bool,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelKwargs {
    #[serde(default = "default_true")]
    pub use_fp16: bool,

    #[serde(default = "default_device")]
    pub device: String,

    /// Maximum sequence length in tokens; longer inputs are truncated.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            model_kwargs: ModelKwargs::default(),
            batch_size: default_batch_size(),
            model_dir: None,
            auto_download: default_true(),
            intra_threads: default_intra_threads(),
        }
    }
}

impl Default for ModelKwargs {
    fn default() -> Self {
        Self {
            use_fp16: default_true(),
            device: default_device(),
            max_length: default_max_length(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl EmbedderConfig {
    /// Load configuration from a JSON or TOML file.
    ///
    /// The format is chosen by extension (`.toml`, anything else is JSON).
    /// A missing file yields the default configuration; a malformed one is
    /// an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let cfg: EmbedderConfig = if is_toml(path) {
            toml::from_str(&data)
                .with_context(|| format!("invalid TOML in {}", path.display()))?
        } else {
            serde_json::from_str(&data)
                .with_context(|| format!("invalid JSON in {}", path.display()))?
        };

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration, picking the format from the extension like [`Self::load`].
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = if is_toml(path) {
            toml::to_string_pretty(self).context("failed to serialize config as TOML")?
        } else {
            serde_json::to_string_pretty(self).context("failed to marshal config")?
        };
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.model.trim().is_empty(), "model must not be empty");
        anyhow::ensure!(
            self.model_kwargs.max_length > 0,
            "model_kwargs.max_length must be positive"
        );
        anyhow::ensure!(
            !self.model_kwargs.device.trim().is_empty(),
            "model_kwargs.device must not be empty"
        );
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.intra_threads > 0, "intra_threads must be positive");
        Ok(())
    }

    /// Directory the model files are read from (and downloaded into).
    #[must_use]
    pub fn resolved_model_dir(&self) -> PathBuf {
        if let Some(dir) = &self.model_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("models"))
            .join("bgem3")
            .join(self.model.replace('/', "_"))
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EmbedderConfig::default();
        assert_eq!(config.model, "BAAI/bge-m3");
        assert!(config.model_kwargs.use_fp16);
        assert_eq!(config.model_kwargs.device, "cpu");
        assert_eq!(config.model_kwargs.max_length, 8192);
        assert_eq!(config.batch_size, 256);
        assert!(config.auto_download);
        assert!(config.model_dir.is_none());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"model_kwargs": {"max_length": 512}, "batch_size": 32}"#;
        let config: EmbedderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_kwargs.max_length, 512);
        assert_eq!(config.batch_size, 32);
        // Other fields should have defaults
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.model_kwargs.use_fp16);
        assert_eq!(config.model_kwargs.device, "cpu");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = EmbedderConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EmbedderConfig::default());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("embedder.toml");
        std::fs::write(
            &path,
            "model = \"BAAI/bge-m3\"\nbatch_size = 8\n\n[model_kwargs]\nuse_fp16 = false\n",
        )
        .unwrap();

        let config = EmbedderConfig::load(&path).unwrap();
        assert_eq!(config.batch_size, 8);
        assert!(!config.model_kwargs.use_fp16);
        assert_eq!(config.model_kwargs.max_length, 8192);
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(EmbedderConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("embedder.json");
        let mut config = EmbedderConfig::default();
        config.model_kwargs.max_length = 1024;
        config.save(&path).unwrap();

        let reloaded = EmbedderConfig::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_validate_ok() {
        assert!(EmbedderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_max_length() {
        let mut config = EmbedderConfig::default();
        config.model_kwargs.max_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = EmbedderConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_blank_model() {
        let mut config = EmbedderConfig::default();
        config.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_model_dir() {
        let config = EmbedderConfig::default();
        let dir = config.resolved_model_dir();
        assert!(dir.to_string_lossy().contains("BAAI_bge-m3"));

        let config = EmbedderConfig {
            model_dir: Some(PathBuf::from("/opt/models/m3")),
            ..Default::default()
        };
        assert_eq!(config.resolved_model_dir(), PathBuf::from("/opt/models/m3"));
    }
}
