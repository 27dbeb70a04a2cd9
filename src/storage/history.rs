//! Per-conversation turn log
//!
//! Each conversation id maps to an append-only list of
//! [`ConversationTurn`]s, capped at the most recent `cap` entries
//! (oldest evicted first).

use crate::error::{Result, RelaywizError};
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key prefix separating conversation logs from settings keys
const CONVERSATION_KEY_PREFIX: &str = "conversation:";

/// Number of turns retained per conversation, and the most a log may keep
pub const DEFAULT_HISTORY_CAP: usize = 8;

/// One part of a multi-part question (vision requests)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionPart {
    /// Plain text part
    Text {
        /// The text
        text: String,
    },
    /// Image reference part
    ImageUrl {
        /// The image reference
        image_url: ImageUrl,
    },
}

/// Image reference carried by a [`QuestionPart::ImageUrl`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// `data:` URL or remote URL of the image
    pub url: String,
}

/// The user side of a turn: plain text or a structured payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Question {
    /// Plain text question
    Text(String),
    /// Text plus image reference
    Parts(Vec<QuestionPart>),
}

impl Question {
    /// Build the two-part text + image question used by vision requests
    pub fn with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Question::Parts(vec![
            QuestionPart::Text { text: text.into() },
            QuestionPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_url.into(),
                },
            },
        ])
    }

    /// Text content of the question, joining the text parts
    pub fn text(&self) -> String {
        match self {
            Question::Text(text) => text.clone(),
            Question::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    QuestionPart::Text { text } => Some(text.as_str()),
                    QuestionPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for Question {
    fn from(value: &str) -> Self {
        Question::Text(value.to_string())
    }
}

impl From<String> for Question {
    fn from(value: String) -> Self {
        Question::Text(value)
    }
}

/// A persisted question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// What the user asked
    pub question: Question,
    /// The accumulated streamed answer
    pub answer: String,
}

impl ConversationTurn {
    /// Create a turn
    pub fn new(question: impl Into<Question>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Conversation history backed by a [`KeyValueStore`]
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relaywiz::storage::{ConversationLog, ConversationTurn, MemoryStore};
///
/// # fn main() -> relaywiz::error::Result<()> {
/// let log = ConversationLog::new(Arc::new(MemoryStore::new()), 8);
/// log.append("conv-1", ConversationTurn::new("Hi", "Hello!"))?;
/// assert_eq!(log.get("conv-1")?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConversationLog {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl ConversationLog {
    /// Create a log over `store` keeping at most `cap` turns per conversation
    pub fn new(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Maximum retained turns per conversation
    pub fn cap(&self) -> usize {
        self.cap
    }

    fn key(conversation_id: &str) -> String {
        format!("{}{}", CONVERSATION_KEY_PREFIX, conversation_id)
    }

    /// Read the turns of a conversation, oldest first
    ///
    /// A conversation that was never written yields an empty list.
    pub fn get(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        match self.store.get(&Self::key(conversation_id))? {
            Some(value) => {
                let turns = serde_json::from_value(value).map_err(|e| {
                    RelaywizError::Storage(format!(
                        "Corrupt history for conversation {}: {}",
                        conversation_id, e
                    ))
                })?;
                Ok(turns)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Append a turn, evicting the oldest turns past the cap
    pub fn append(&self, conversation_id: &str, turn: ConversationTurn) -> Result<()> {
        let mut turns = self.get(conversation_id)?;
        turns.push(turn);

        if turns.len() > self.cap {
            let excess = turns.len() - self.cap;
            turns.drain(..excess);
        }

        tracing::debug!(
            conversation_id,
            turns = turns.len(),
            "Persisting conversation turn"
        );

        self.store
            .set(&Self::key(conversation_id), serde_json::to_value(&turns)?)
    }

    /// Drop the whole conversation
    pub fn clear(&self, conversation_id: &str) -> Result<()> {
        self.store.remove(&Self::key(conversation_id))
    }
}
