//! Provider module for Relaywiz
//!
//! This module contains the chat provider abstraction and the
//! OpenAI-compatible implementation used by the relay.

pub mod base;
pub mod openai;
pub mod speech;

pub use base::{ByteStream, Message, MessageContent, ModelInfo, Provider, StreamOpening};
pub use openai::OpenAiProvider;

use crate::config::ProviderConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create the provider described by `config`
///
/// # Errors
///
/// Returns error if the HTTP client cannot be initialized
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    Ok(Arc::new(OpenAiProvider::new(config)?))
}
