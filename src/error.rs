//! Error types for Relaywiz
//!
//! This module defines all error types used throughout the relay,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Relaywiz operations
///
/// Covers configuration loading, provider HTTP calls, the storage port,
/// credential encryption, the OCR companion service and the page/worker
/// channel.
#[derive(Error, Debug)]
pub enum RelaywizError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (API calls, bad status codes, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Missing credentials for provider
    #[error("Missing credentials for provider: {0}")]
    MissingCredentials(String),

    /// Key-value storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Credential encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// OCR companion service reported a failure
    #[error("OCR error: {0}")]
    Ocr(String),

    /// The page/worker channel was closed or refused
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Relaywiz operations
///
/// Uses `anyhow::Error` so callers get rich context while the
/// concrete [`RelaywizError`] stays downcastable.
pub type Result<T> = anyhow::Result<T>;
