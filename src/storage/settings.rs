//! User settings persisted in the key-value store
//!
//! The API key never touches the store in clear text: it is sealed with
//! [`secret::encrypt`](crate::storage::secret::encrypt) under a random
//! password kept next to it.

use crate::error::{Result, RelaywizError};
use crate::relay::task::TaskKind;
use crate::storage::{secret, KeyValueStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

const KEY_API_KEY: &str = "openaiKey";
const KEY_PASSWORD: &str = "id";
const KEY_MODEL: &str = "model";
const KEY_NATIVE_LANG: &str = "nativeLang";
const KEY_POPUP: &str = "settingPopup";
const KEY_TASK: &str = "type";
const KEY_VOICE: &str = "voice";

/// How the page agent reacts to a text selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupMode {
    /// Show a hover icon that opens the popup on click
    #[default]
    DisplayIcon,
    /// Open the popup immediately
    Immediately,
    /// Ignore selections
    Hide,
}

impl fmt::Display for PopupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopupMode::DisplayIcon => write!(f, "display_icon"),
            PopupMode::Immediately => write!(f, "immediately"),
            PopupMode::Hide => write!(f, "hide"),
        }
    }
}

impl FromStr for PopupMode {
    type Err = RelaywizError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "display_icon" => Ok(PopupMode::DisplayIcon),
            "immediately" => Ok(PopupMode::Immediately),
            "hide" => Ok(PopupMode::Hide),
            other => Err(RelaywizError::Config(format!(
                "Unknown popup mode: {}. Must be one of: display_icon, immediately, hide",
                other
            ))),
        }
    }
}

/// Decrypted view of the stored settings
#[derive(Clone, PartialEq)]
pub struct Settings {
    /// Decrypted API key; empty when none is stored
    pub api_key: String,
    /// Chat model
    pub model: String,
    /// Default target language code
    pub native_lang: String,
    /// Selection behavior
    pub popup_mode: PopupMode,
    /// Task run by the quick action
    pub default_task: TaskKind,
    /// Text-to-speech voice
    pub voice: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("model", &self.model)
            .field("native_lang", &self.native_lang)
            .field("popup_mode", &self.popup_mode)
            .field("default_task", &self.default_task)
            .field("voice", &self.voice)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            native_lang: "en".to_string(),
            popup_mode: PopupMode::default(),
            default_task: TaskKind::Translate,
            voice: "alloy".to_string(),
        }
    }
}

fn string_at(store: &dyn KeyValueStore, key: &str) -> Result<Option<String>> {
    Ok(store
        .get(key)?
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty()))
}

impl Settings {
    /// Load settings, filling defaults for missing keys
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored key cannot be
    /// decrypted with the stored password.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Self::load_with(store, Settings::default())
    }

    /// Load settings, filling missing keys from `defaults`
    pub fn load_with(store: &dyn KeyValueStore, defaults: Settings) -> Result<Self> {
        let api_key = match (string_at(store, KEY_API_KEY)?, string_at(store, KEY_PASSWORD)?) {
            (Some(sealed), Some(password)) => secret::decrypt(&sealed, &password)?.to_string(),
            _ => String::new(),
        };

        let popup_mode = match string_at(store, KEY_POPUP)? {
            Some(mode) => mode.parse().unwrap_or_else(|e| {
                tracing::warn!("Ignoring stored popup mode: {}", e);
                PopupMode::default()
            }),
            None => defaults.popup_mode,
        };

        Ok(Self {
            api_key,
            model: string_at(store, KEY_MODEL)?.unwrap_or(defaults.model),
            native_lang: string_at(store, KEY_NATIVE_LANG)?.unwrap_or(defaults.native_lang),
            popup_mode,
            default_task: string_at(store, KEY_TASK)?
                .map(|t| TaskKind::from_wire(&t))
                .unwrap_or(defaults.default_task),
            voice: string_at(store, KEY_VOICE)?.unwrap_or(defaults.voice),
        })
    }

    /// Persist every setting; the API key is re-sealed under a fresh password
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        if self.api_key.is_empty() {
            store.remove(KEY_API_KEY)?;
            store.remove(KEY_PASSWORD)?;
        } else {
            let password = secret::generate_password();
            let sealed = secret::encrypt(&self.api_key, &password)?;
            store.set(KEY_API_KEY, Value::String(sealed))?;
            store.set(KEY_PASSWORD, Value::String(password))?;
        }

        store.set(KEY_MODEL, json!(self.model))?;
        store.set(KEY_NATIVE_LANG, json!(self.native_lang))?;
        store.set(KEY_POPUP, json!(self.popup_mode.to_string()))?;
        store.set(KEY_TASK, json!(self.default_task.wire_name()))?;
        store.set(KEY_VOICE, json!(self.voice))?;
        Ok(())
    }

    /// Forget the stored API key, leaving other settings in place
    pub fn clear_api_key(store: &dyn KeyValueStore) -> Result<()> {
        store.remove(KEY_API_KEY)?;
        store.remove(KEY_PASSWORD)
    }

    /// The API key, or `MissingCredentials` when none is stored
    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(RelaywizError::MissingCredentials("openai".into()).into());
        }
        Ok(&self.api_key)
    }
}
