//! Storage port for settings and conversation history
//!
//! Business logic only sees the narrow [`KeyValueStore`] interface
//! (`get`, `set`, `remove`). [`SledStore`] persists to an embedded
//! `sled` database; [`MemoryStore`] is the in-memory substitute used by
//! tests and ephemeral runs.

use crate::error::{Result, RelaywizError};
use serde_json::Value;
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

pub mod history;
pub mod secret;
pub mod settings;

pub use history::{ConversationLog, ConversationTurn, Question, QuestionPart};
pub use settings::{PopupMode, Settings};

/// Namespaced string-keyed store of JSON values
///
/// Operations are synchronous; both implementations complete without
/// blocking for any meaningful time.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Persistent store backed by an embedded `sled` database
///
/// # Examples
///
/// ```
/// use relaywiz::storage::{KeyValueStore, SledStore};
///
/// # fn main() -> relaywiz::error::Result<()> {
/// let dir = tempfile::TempDir::new()?;
/// let store = SledStore::open(dir.path().join("store"))?;
/// store.set("nativeLang", serde_json::json!("vi"))?;
/// assert_eq!(store.get("nativeLang")?, Some(serde_json::json!("vi")));
/// # Ok(())
/// # }
/// ```
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    ///
    /// Returns `RelaywizError::Storage` if the database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| RelaywizError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| RelaywizError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| RelaywizError::Storage(format!("Deserialization failed: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| RelaywizError::Storage(format!("Serialization failed: {}", e)))?;

        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| RelaywizError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| RelaywizError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| RelaywizError::Storage(format!("Remove failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| RelaywizError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| RelaywizError::Storage("memory store lock poisoned".into()).into())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
