use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LexicaError, Result};

/// Top-level configuration for the Lexica pipeline.
///
/// Loaded from `~/.lexica/config.toml` by default. Each section corresponds
/// to one stage or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexicaConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub packaging: PackagingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

impl LexicaConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LexicaConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| LexicaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.lexica/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Translation stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Provider: "echo" (development) or "http".
    pub provider: String,
    /// Chat-completions endpoint for the http provider.
    pub endpoint: String,
    /// Model name sent to the http provider.
    pub model: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    /// Default source language.
    pub source_lang: String,
    /// Default target language.
    pub target_lang: String,
    /// Default batch limit per invocation.
    pub batch_limit: u32,
    /// Maximum source-text characters sent to the provider.
    pub text_limit: usize,
    /// Failed records are retried on later runs until this many attempts.
    pub max_attempts: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "LEXICA_TRANSLATE_API_KEY".to_string(),
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            batch_limit: 200,
            text_limit: 2000,
            max_attempts: 5,
        }
    }
}

/// Packaging stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    /// Maximum document bytes (UTF-8 safe truncation).
    pub text_limit: usize,
    /// Maximum sample entries carried in a packaging report.
    pub samples_max: usize,
    /// Default index collection for field documents.
    pub field_collection: String,
    /// Default index collection for view documents.
    pub view_collection: String,
    /// Package source-language text when no translation exists for the
    /// requested language.
    pub fallback_to_source: bool,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            text_limit: 16 * 1024,
            samples_max: 5,
            field_collection: "lexica_field".to_string(),
            view_collection: "lexica_view_common".to_string(),
            fallback_to_source: false,
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the vector store HTTP API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether `failed` documents are re-selected for upsert.
    pub retry_failed: bool,
    /// Failed documents stop being retried after this many attempts.
    pub max_attempts: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 10,
            retry_failed: true,
            max_attempts: 5,
        }
    }
}
