//! Client for the OCR companion service
//!
//! The service accepts a PNG upload in the multipart field `file` and
//! answers `{"text": ...}` on success or `{"message": ...}` otherwise.

use crate::config::OcrConfig;
use crate::error::{Result, RelaywizError};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use ulid::Ulid;

#[derive(Debug, Deserialize)]
struct OcrSuccess {
    text: String,
}

#[derive(Debug, Deserialize)]
struct OcrFailure {
    message: String,
}

/// OCR companion-service client
///
/// # Examples
///
/// ```
/// use relaywiz::config::OcrConfig;
/// use relaywiz::ocr::OcrClient;
///
/// let client = OcrClient::new(&OcrConfig::default()).unwrap();
/// assert_eq!(client.endpoint(), "http://localhost:3000/upload");
/// ```
#[derive(Debug, Clone)]
pub struct OcrClient {
    client: Client,
    endpoint: String,
}

impl OcrClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("relaywiz/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelaywizError::Ocr(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Upload endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Recognize the text in a PNG image
    ///
    /// An empty string means the service found no text.
    ///
    /// # Errors
    ///
    /// Returns `RelaywizError::Ocr` carrying the service's message when it
    /// reports a failure, or a transport error when it cannot be reached.
    pub async fn recognize(&self, png: Vec<u8>) -> Result<String> {
        let filename = format!("{}.png", Ulid::new().to_string().to_lowercase());
        let size = png.len();
        let part = Part::bytes(png)
            .file_name(filename.clone())
            .mime_str("image/png")
            .map_err(|e| RelaywizError::Ocr(format!("Invalid upload: {}", e)))?;
        let form = Form::new().part("file", part);

        tracing::debug!(
            endpoint = %self.endpoint,
            filename = %filename,
            size,
            "Uploading image for OCR"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RelaywizError::Ocr(format!("OCR service unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let body: OcrSuccess = response
                .json()
                .await
                .map_err(|e| RelaywizError::Ocr(format!("Malformed OCR response: {}", e)))?;
            tracing::debug!(chars = body.text.chars().count(), "OCR finished");
            return Ok(body.text);
        }

        let message = match response.json::<OcrFailure>().await {
            Ok(failure) => failure.message,
            Err(_) => format!("OCR service returned {}", status),
        };
        tracing::warn!(%status, "OCR failed: {}", message);
        Err(RelaywizError::Ocr(message).into())
    }
}
