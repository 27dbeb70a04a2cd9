//! Text-to-speech request
//!
//! The response body is raw audio delivered as opaque chunks.

use crate::error::Result;
use crate::providers::base::StreamOpening;
use crate::providers::openai::classify_response;
use reqwest::Client;
use serde::Serialize;

/// Request body of `/audio/speech`
#[derive(Debug, Serialize)]
pub struct SpeechRequest<'a> {
    /// Speech model, e.g. `tts-1`
    pub model: &'a str,
    /// Text to read
    pub input: &'a str,
    /// Voice name, e.g. `alloy`
    pub voice: &'a str,
}

pub(crate) async fn open(
    client: &Client,
    url: &str,
    api_key: &str,
    request: &SpeechRequest<'_>,
) -> Result<StreamOpening> {
    tracing::debug!(
        "Sending speech request: model={}, voice={}, {} chars",
        request.model,
        request.voice,
        request.input.chars().count()
    );

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await?;

    Ok(classify_response(response))
}
