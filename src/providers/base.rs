//! Base provider trait and common types for Relaywiz
//!
//! This module defines the [`Provider`] trait implemented by chat-completion
//! backends, the role-tagged [`Message`] sent to them, and the raw
//! [`StreamOpening`] a streaming request resolves to before any decoding.

use crate::error::Result;
use crate::storage::{Question, QuestionPart};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Content of a chat message: plain text or text plus image parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Multi-part content (vision)
    Parts(Vec<QuestionPart>),
}

impl From<Question> for MessageContent {
    fn from(question: Question) -> Self {
        match question {
            Question::Text(text) => MessageContent::Text(text),
            Question::Parts(parts) => MessageContent::Parts(parts),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// Message structure for conversation
///
/// Represents one role-tagged entry of the message list sent to the
/// chat-completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    /// Content of the message
    pub content: MessageContent,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::providers::Message;
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new system message
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::providers::Message;
    ///
    /// let msg = Message::system("You are a helpful assistant");
    /// assert_eq!(msg.role, "system");
    /// ```
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Text of the message, ignoring image parts
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => Question::Parts(parts.clone()).text(),
        }
    }
}

/// Model entry returned by the model listing endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier, e.g. `gpt-4o`
    pub id: String,
}

impl ModelInfo {
    /// Create a model entry
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Whether this model accepts image input
    pub fn supports_vision(&self) -> bool {
        self.id.contains("vision") || self.id.starts_with("gpt-4o") || self.id == "gpt-4-turbo"
    }
}

/// Raw response body, chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// What a streaming request resolved to once response headers arrived
pub enum StreamOpening {
    /// 200 with a readable body
    Body(ByteStream),
    /// Any status other than 200
    Rejected {
        /// HTTP status code
        status: u16,
    },
    /// 200 but the response declares no body
    NoBody,
}

impl std::fmt::Debug for StreamOpening {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOpening::Body(_) => write!(f, "Body(..)"),
            StreamOpening::Rejected { status } => write!(f, "Rejected({})", status),
            StreamOpening::NoBody => write!(f, "NoBody"),
        }
    }
}

/// Chat-completion backend
///
/// Implementations only open connections; decoding the body into
/// fragments is done by the relay.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue one streaming chat-completion request
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be sent at all
    async fn open_chat_stream(
        &self,
        api_key: &str,
        model: &str,
        messages: &[Message],
    ) -> Result<StreamOpening>;

    /// Issue one text-to-speech request streaming raw audio
    async fn open_speech_stream(
        &self,
        api_key: &str,
        input: &str,
        voice: &str,
    ) -> Result<StreamOpening>;

    /// List chat models usable by the relay
    async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>>;

    /// Check that `api_key` is accepted by the backend
    async fn validate_key(&self, api_key: &str, model: &str) -> Result<bool>;
}
