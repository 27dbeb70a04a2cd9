//! Configuration management for Relaywiz
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, RelaywizError};
use crate::storage::history::DEFAULT_HISTORY_CAP;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Relaywiz
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM provider endpoints and defaults
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Relay worker behavior
    #[serde(default)]
    pub relay: RelayConfig,
    /// Key-value store location
    #[serde(default)]
    pub storage: StorageConfig,
    /// OCR companion service
    #[serde(default)]
    pub ocr: OcrConfig,
}

/// Provider configuration
///
/// The chat-completion, speech and model-listing endpoints are all built
/// from `api_base`, which lets tests point the relay at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Fallback chat model when the settings store has none
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for text-to-speech
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Optional User-Agent override
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            tts_model: default_tts_model(),
            user_agent: None,
        }
    }
}

/// Relay worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Number of conversation turns kept per conversation id, 1 to 8
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Prefix a channel name must carry to be accepted by the worker
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

fn default_channel_prefix() -> String {
    "content-script".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            channel_prefix: default_channel_prefix(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Directory of the sled database; defaults to the user data dir
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database directory, falling back to the platform data dir
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let proj_dirs = directories::ProjectDirs::from("com", "relaywiz", "relaywiz")
            .ok_or_else(|| RelaywizError::Storage("Could not determine data directory".into()))?;
        Ok(proj_dirs.data_dir().join("store"))
    }
}

/// OCR companion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Upload endpoint accepting a multipart `file` field
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
}

fn default_ocr_endpoint() -> String {
    "http://localhost:3000/upload".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelaywizError::Config(format!("Failed to read {}: {}", path, e)))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(api_base) = std::env::var("RELAYWIZ_API_BASE") {
            tracing::debug!(api_base = %api_base, "Env override: RELAYWIZ_API_BASE");
            self.provider.api_base = api_base;
        }

        if let Ok(model) = std::env::var("RELAYWIZ_MODEL") {
            self.provider.model = model;
        }

        if let Ok(tts_model) = std::env::var("RELAYWIZ_TTS_MODEL") {
            self.provider.tts_model = tts_model;
        }

        if let Ok(endpoint) = std::env::var("RELAYWIZ_OCR_ENDPOINT") {
            self.ocr.endpoint = endpoint;
        }

        if let Ok(path) = std::env::var("RELAYWIZ_STORE_PATH") {
            tracing::debug!(path = %path, "Env override: RELAYWIZ_STORE_PATH");
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(cap) = std::env::var("RELAYWIZ_HISTORY_CAP") {
            match cap.parse::<usize>() {
                Ok(v) => self.relay.history_cap = v,
                Err(_) => tracing::warn!("Invalid RELAYWIZ_HISTORY_CAP: {}", cap),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.store {
            self.storage.path = Some(PathBuf::from(path));
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a URL is malformed or the history cap is zero
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_base.trim().is_empty() {
            return Err(RelaywizError::Config("provider.api_base cannot be empty".into()).into());
        }

        url::Url::parse(&self.provider.api_base).map_err(|e| {
            RelaywizError::Config(format!(
                "provider.api_base is not a valid URL ({}): {}",
                self.provider.api_base, e
            ))
        })?;

        url::Url::parse(&self.ocr.endpoint).map_err(|e| {
            RelaywizError::Config(format!(
                "ocr.endpoint is not a valid URL ({}): {}",
                self.ocr.endpoint, e
            ))
        })?;

        if self.provider.model.trim().is_empty() {
            return Err(RelaywizError::Config("provider.model cannot be empty".into()).into());
        }

        if self.relay.history_cap == 0 || self.relay.history_cap > DEFAULT_HISTORY_CAP {
            return Err(RelaywizError::Config(format!(
                "relay.history_cap must be between 1 and {}, got {}",
                DEFAULT_HISTORY_CAP, self.relay.history_cap
            ))
            .into());
        }

        if self.relay.channel_prefix.is_empty() {
            return Err(
                RelaywizError::Config("relay.channel_prefix cannot be empty".into()).into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provider.api_base, "https://api.openai.com/v1");
        assert_eq!(config.provider.model, "gpt-3.5-turbo");
        assert_eq!(config.relay.history_cap, 8);
        assert_eq!(config.relay.channel_prefix, "content-script");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
provider:
  api_base: http://localhost:8080/v1
  model: gpt-4o-mini
relay:
  history_cap: 4
ocr:
  endpoint: http://ocr.local/upload
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.provider.api_base, "http://localhost:8080/v1");
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.provider.tts_model, "tts-1");
        assert_eq!(config.relay.history_cap, 4);
        assert_eq!(config.ocr.endpoint, "http://ocr.local/upload");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = Config::from_file("config/config.yaml").unwrap();
        assert_eq!(config.provider.tts_model, "tts-1");
        assert!(config.storage.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_history_cap() {
        let mut config = Config::default();
        config.relay.history_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_history_cap_above_eight() {
        let mut config = Config::default();
        config.relay.history_cap = 9;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("between 1 and 8"));

        config.relay.history_cap = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_api_base() {
        let mut config = Config::default();
        config.provider.api_base = "not a url".to_string();
        assert!(config.validate().is_err());

        config.provider.api_base = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = Config::load("/nonexistent/relaywiz.yaml", &cli).unwrap();
        assert_eq!(config.relay.history_cap, 8);
    }

    #[test]
    #[serial]
    fn test_cli_store_override() {
        let mut cli = crate::cli::Cli::default();
        cli.store = Some("/tmp/relaywiz-store".to_string());
        let config = Config::load("/nonexistent/relaywiz.yaml", &cli).unwrap();
        assert_eq!(
            config.storage.resolve_path().unwrap(),
            PathBuf::from("/tmp/relaywiz-store")
        );
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_provider() {
        std::env::set_var("RELAYWIZ_API_BASE", "http://127.0.0.1:9/v1");
        std::env::set_var("RELAYWIZ_HISTORY_CAP", "3");
        let mut config = Config::default();
        config.apply_env_vars();
        std::env::remove_var("RELAYWIZ_API_BASE");
        std::env::remove_var("RELAYWIZ_HISTORY_CAP");

        assert_eq!(config.provider.api_base, "http://127.0.0.1:9/v1");
        assert_eq!(config.relay.history_cap, 3);
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_ignores_invalid_cap() {
        std::env::set_var("RELAYWIZ_HISTORY_CAP", "many");
        let mut config = Config::default();
        config.apply_env_vars();
        std::env::remove_var("RELAYWIZ_HISTORY_CAP");

        assert_eq!(config.relay.history_cap, 8);
    }
}
