//! Visible-page capture
//!
//! The worker does not know how to grab pixels; a [`Capture`]
//! implementation is injected by whoever hosts it.

use crate::error::{Result, RelaywizError};
use crate::relay::port::TabId;
use async_trait::async_trait;
use base64::Engine;
use std::path::PathBuf;

/// Source of PNG screenshots of a tab
#[async_trait]
pub trait Capture: Send + Sync {
    /// Capture the visible area of `tab` as a `data:image/png;base64,` URL
    async fn capture_visible(&self, tab: TabId) -> Result<String>;
}

/// Encode PNG bytes as a data URL
pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Decode a `data:` URL produced by [`png_data_url`]
///
/// # Errors
///
/// Returns `RelaywizError::Channel` if the URL is not base64 data
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (_, encoded) = data_url
        .split_once(";base64,")
        .ok_or_else(|| RelaywizError::Channel("Capture is not a base64 data URL".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| RelaywizError::Channel(format!("Invalid capture data: {}", e)))?;
    Ok(bytes)
}

/// Capture that serves a PNG file from disk, whatever the tab
#[derive(Debug, Clone)]
pub struct FileCapture {
    path: PathBuf,
}

impl FileCapture {
    /// Serve `path` as the capture
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Capture for FileCapture {
    async fn capture_visible(&self, tab: TabId) -> Result<String> {
        tracing::debug!(tab, path = %self.path.display(), "Capturing from file");
        let png = tokio::fs::read(&self.path).await?;
        Ok(png_data_url(&png))
    }
}
