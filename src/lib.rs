//! Relaywiz - streaming relay for AI text actions
//!
//! This library provides a background relay worker that turns page
//! requests (translate, explain, summarize, rewrite, grammar, chat,
//! vision, read aloud) into streaming calls to an OpenAI-compatible API,
//! and the page agent that drives an overlay against it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `relay`: Relay worker, channels, SSE decoding, cancellation registry
//! - `page`: Overlay state machine and the page agent driving it
//! - `providers`: Chat-completion, speech and model-listing HTTP clients
//! - `storage`: Key-value store port, settings, conversation history
//! - `ocr`: Client for the OCR companion service
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relaywiz::{Config, RelayWorker};
//! use relaywiz::providers::create_provider;
//! use relaywiz::relay::{PageRequest, TaskKind};
//! use relaywiz::storage::{KeyValueStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
//!     let provider = create_provider(&config.provider)?;
//!     let worker = Arc::new(RelayWorker::new(&config, provider, store));
//!
//!     let mut port = worker.connect("content-script-demo", 1);
//!     port.post(PageRequest::stream("Hello", "demo", TaskKind::Translate, "fr"))?;
//!     while let Some(reply) = port.recv().await {
//!         if reply.is_done() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod ocr;
pub mod page;
pub mod providers;
pub mod relay;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{RelaywizError, Result};
pub use page::{Overlay, PageAgent};
pub use relay::RelayWorker;

#[cfg(test)]
pub mod test_utils;
