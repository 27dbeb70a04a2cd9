//! Test utilities for Relaywiz
//!
//! Scripted provider, SSE body builders and store helpers shared by the
//! unit tests.

use crate::error::{Result, RelaywizError};
use crate::providers::{ByteStream, Message, ModelInfo, Provider, StreamOpening};
use crate::storage::{ConversationLog, MemoryStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Conversation log over a fresh in-memory store
pub fn memory_history() -> ConversationLog {
    ConversationLog::new(Arc::new(MemoryStore::new()), 8)
}

/// One SSE chunk per token, followed by the `[DONE]` marker
pub fn sse_body(id: &str, tokens: &[&str]) -> Vec<Bytes> {
    let mut chunks: Vec<Bytes> = tokens
        .iter()
        .map(|token| {
            let record = serde_json::json!({
                "id": id,
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": token}}]
            });
            Bytes::from(format!("data: {}\n\n", record))
        })
        .collect();
    chunks.push(Bytes::from_static(b"data: [DONE]\n\n"));
    chunks
}

#[derive(Debug, Clone)]
enum Script {
    Body(Vec<Bytes>),
    BodyThenStall(Vec<Bytes>),
    BodyThenError(Vec<Bytes>, String),
    Rejected(u16),
    NoBody,
    Stalled,
    Fail(String),
}

/// Provider replaying a fixed response to every request
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Script,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::with_body(Vec::new())
    }
}

impl ScriptedProvider {
    fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer 200 with `chunks` as the body
    pub fn with_body(chunks: Vec<Bytes>) -> Self {
        Self::new(Script::Body(chunks))
    }

    /// Answer 200, send `chunks`, then never finish the body
    pub fn stalling_after(chunks: Vec<Bytes>) -> Self {
        Self::new(Script::BodyThenStall(chunks))
    }

    /// Answer 200, send `chunks`, then fail the body with `message`
    pub fn breaking_after(chunks: Vec<Bytes>, message: &str) -> Self {
        Self::new(Script::BodyThenError(chunks, message.to_string()))
    }

    /// Answer with `status`
    pub fn rejected(status: u16) -> Self {
        Self::new(Script::Rejected(status))
    }

    /// Answer 200 without a body
    pub fn no_body() -> Self {
        Self::new(Script::NoBody)
    }

    /// Never answer
    pub fn stalled() -> Self {
        Self::new(Script::Stalled)
    }

    /// Fail to send the request
    pub fn failing(message: &str) -> Self {
        Self::new(Script::Fail(message.to_string()))
    }

    /// Message lists received so far
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().expect("requests lock").clone()
    }

    async fn open(&self) -> Result<StreamOpening> {
        match self.script.clone() {
            Script::Body(chunks) => {
                let body: ByteStream = Box::pin(futures::stream::iter(
                    chunks.into_iter().map(Ok::<Bytes, anyhow::Error>),
                ));
                Ok(StreamOpening::Body(body))
            }
            Script::BodyThenStall(chunks) => {
                let body: ByteStream = Box::pin(
                    futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, anyhow::Error>))
                        .chain(futures::stream::pending()),
                );
                Ok(StreamOpening::Body(body))
            }
            Script::BodyThenError(chunks, message) => {
                let failure: Result<Bytes> = Err(RelaywizError::Provider(message).into());
                let body: ByteStream = Box::pin(
                    futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, anyhow::Error>))
                        .chain(futures::stream::once(async move { failure })),
                );
                Ok(StreamOpening::Body(body))
            }
            Script::Rejected(status) => Ok(StreamOpening::Rejected { status }),
            Script::NoBody => Ok(StreamOpening::NoBody),
            Script::Stalled => futures::future::pending().await,
            Script::Fail(message) => Err(RelaywizError::Provider(message).into()),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn open_chat_stream(
        &self,
        _api_key: &str,
        _model: &str,
        messages: &[Message],
    ) -> Result<StreamOpening> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.to_vec());
        self.open().await
    }

    async fn open_speech_stream(
        &self,
        _api_key: &str,
        _input: &str,
        _voice: &str,
    ) -> Result<StreamOpening> {
        self.open().await
    }

    async fn list_models(&self, _api_key: &str) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo::new("gpt-3.5-turbo")])
    }

    async fn validate_key(&self, _api_key: &str, _model: &str) -> Result<bool> {
        Ok(!matches!(self.script, Script::Rejected(_)))
    }
}
