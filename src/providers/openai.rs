//! OpenAI-compatible provider implementation for Relaywiz
//!
//! Streams chat completions from `{api_base}/chat/completions`, lists
//! models from `{api_base}/models` and checks credentials with a tiny
//! non-streaming completion. Text-to-speech lives in
//! [`speech`](crate::providers::speech).

use crate::config::ProviderConfig;
use crate::error::{Result, RelaywizError};
use crate::providers::base::{ByteStream, Message, ModelInfo, Provider, StreamOpening};
use crate::providers::speech;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Model id prefixes offered for selection
const CHAT_MODEL_PREFIXES: [&str; 2] = ["gpt-4", "gpt-3.5"];

/// OpenAI API provider
///
/// No request timeout is configured: a stalled stream stays open until
/// the session is cancelled.
///
/// # Examples
///
/// ```
/// use relaywiz::config::ProviderConfig;
/// use relaywiz::providers::OpenAiProvider;
///
/// let provider = OpenAiProvider::new(&ProviderConfig::default()).unwrap();
/// assert_eq!(provider.api_base(), "https://api.openai.com/v1");
/// ```
pub struct OpenAiProvider {
    client: Client,
    api_base: String,
    tts_model: String,
}

/// Request body of `/chat/completions`
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

/// Response of `/models`
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

impl OpenAiProvider {
    /// Create a provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("relaywiz/{}", env!("CARGO_PKG_VERSION")));

        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| RelaywizError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!("Initialized OpenAI provider: api_base={}", config.api_base);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tts_model: config.tts_model.clone(),
        })
    }

    /// Base URL requests are built from
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }
}

/// Classify a response by status and declared body before streaming it
pub(crate) fn classify_response(response: reqwest::Response) -> StreamOpening {
    let status = response.status();
    if status != StatusCode::OK {
        tracing::warn!("Provider returned status {}", status);
        return StreamOpening::Rejected {
            status: status.as_u16(),
        };
    }

    if response.content_length() == Some(0) {
        tracing::warn!("Provider returned 200 without a body");
        return StreamOpening::NoBody;
    }

    let body: ByteStream = Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from)),
    );
    StreamOpening::Body(body)
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn open_chat_stream(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<StreamOpening> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };

        tracing::debug!(
            "Sending chat request: model={}, {} messages",
            model,
            messages.len()
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        Ok(classify_response(response))
    }

    async fn open_speech_stream(
        &self,
        api_key: &str,
        input: &str,
        voice: &str,
    ) -> Result<StreamOpening> {
        let request = speech::SpeechRequest {
            model: &self.tts_model,
            input,
            voice,
        };
        speech::open(&self.client, &self.endpoint("audio/speech"), api_key, &request).await
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("models");
        tracing::debug!("Fetching models from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| RelaywizError::Provider(format!("Failed to list models: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Model listing returned error {}: {}", status, error_text);
            return Err(RelaywizError::Provider(format!(
                "Model listing returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: ModelsResponse = response.json().await.map_err(|e| {
            RelaywizError::Provider(format!("Failed to parse model listing: {}", e))
        })?;

        let mut models: Vec<ModelInfo> = body
            .data
            .into_iter()
            .filter(|m| CHAT_MODEL_PREFIXES.iter().any(|p| m.id.starts_with(p)))
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn validate_key(&self, api_key: &str, model: &str) -> Result<bool> {
        let messages = [Message::user("Hi")];
        let request = ChatRequest {
            model,
            messages: &messages,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelaywizError::Provider(format!("Key check failed: {}", e)))?;

        let status = response.status();
        tracing::debug!("Key check returned {}", status);
        Ok(status == StatusCode::OK || status == StatusCode::CREATED)
    }
}
