/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

Text commands (`run`, `chat`, `read`, `ocr --solve`) do not call the
provider directly: they drive a [`PageAgent`] against an in-process
[`RelayWorker`] exactly like a browser page would, with a
[`TerminalRenderer`] standing in for the popup.

- `run`:      single-shot task (translate, explain, ...)
- `chat`:     interactive conversation, optionally about an image
- `read`:     text-to-speech into an MP3 file
- `ocr`:      recognize or solve a screenshot
- `auth`:     store, clear or inspect the API key
- `settings`: show or change stored settings
- `history`:  inspect or forget conversations
- `models`:   list available chat models
*/

use crate::config::Config;
use crate::error::{Result, RelaywizError};
use crate::page::{Overlay, OverlayCommand, PageAgent, Renderer};
use crate::providers::{create_provider, Provider};
use crate::relay::{Capture, RelayWorker, TabId};
use crate::storage::{KeyValueStore, PopupMode, Settings, SledStore};
use colored::Colorize;
use std::io::{Read, Write};
use std::sync::Arc;

// Conversation history inspection
pub mod history;

// Model listing
pub mod models;

/// Tab id used for every CLI session
pub const CLI_TAB: TabId = 0;

/// Store, provider and configuration shared by the command handlers
#[derive(Clone)]
pub struct Runtime {
    /// Loaded configuration
    pub config: Config,
    /// Settings and history store
    pub store: Arc<dyn KeyValueStore>,
    /// Chat/speech provider
    pub provider: Arc<dyn Provider>,
}

impl Runtime {
    /// Open the configured store and create the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or the HTTP client
    /// cannot be built
    pub fn open(config: Config) -> Result<Self> {
        let path = config.storage.resolve_path()?;
        tracing::debug!(path = %path.display(), "Opening store");
        let store: Arc<dyn KeyValueStore> = Arc::new(SledStore::open(&path)?);
        let provider = create_provider(&config.provider)?;
        Ok(Self::new(config, store, provider))
    }

    /// Assemble a runtime from parts
    pub fn new(config: Config, store: Arc<dyn KeyValueStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            store,
            provider,
        }
    }

    /// Stored settings, with the configured model as fallback
    pub fn settings(&self) -> Result<Settings> {
        let defaults = Settings {
            model: self.config.provider.model.clone(),
            ..Settings::default()
        };
        Settings::load_with(self.store.as_ref(), defaults)
    }

    /// A relay worker over this runtime's provider and store
    pub fn worker(&self, capture: Option<Arc<dyn Capture>>) -> Arc<RelayWorker> {
        let worker = RelayWorker::new(
            &self.config,
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
        );
        Arc::new(match capture {
            Some(capture) => worker.with_capture(capture),
            None => worker,
        })
    }

    /// A page agent for the CLI tab rendering into `out`
    pub fn agent<W: Write + Send>(
        &self,
        worker: Arc<RelayWorker>,
        overlay: Overlay,
        out: W,
    ) -> PageAgent<TerminalRenderer<W>> {
        PageAgent::new(worker, CLI_TAB, overlay, TerminalRenderer::new(out))
    }
}

/// Overlay for a terminal session: no icon, popup opens right away
pub fn terminal_overlay(settings: &Settings, language: Option<String>) -> Overlay {
    Overlay::new(
        PopupMode::Immediately,
        settings.default_task,
        language.unwrap_or_else(|| settings.native_lang.clone()),
    )
}

/// Renderer that streams answers to a writer
///
/// Audio is buffered for the caller; errors go to stderr.
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
    audio: Vec<u8>,
    error: Option<String>,
}

impl<W: Write + Send> TerminalRenderer<W> {
    /// Render into `out`
    pub fn new(out: W) -> Self {
        Self {
            out,
            audio: Vec::new(),
            error: None,
        }
    }

    /// Audio received so far
    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    /// Last error shown, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        let written = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            tracing::debug!("Failed to write answer: {}", e);
        }
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn apply(&mut self, command: &OverlayCommand) {
        match command {
            OverlayCommand::AppendToken { token, .. } => self.write(token),
            OverlayCommand::ClearAnswer => self.write("\n---\n"),
            OverlayCommand::EnableCopy => self.write("\n"),
            OverlayCommand::PlayAudio(bytes) => self.audio.extend_from_slice(bytes),
            OverlayCommand::ShowError(message) => {
                eprintln!("{}", message.red());
                self.error = Some(message.clone());
            }
            other => tracing::trace!(?other, "Nothing to render"),
        }
    }
}

/// `text`, or all of stdin when absent
fn text_or_stdin(text: Option<String>) -> Result<String> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    if text.trim().is_empty() {
        return Err(RelaywizError::Config("No text given".into()).into());
    }
    Ok(text)
}

/// Run a single-shot task
pub mod run {
    //! Single-shot task handler.
    //!
    //! Opens an immediate popup for the task with the text as the
    //! selection and streams the answer to stdout.

    use super::*;
    use crate::page::OverlayEvent;
    use crate::relay::TaskKind;

    /// Run `task` on `text` (or stdin)
    pub async fn run_task(
        config: Config,
        task: Option<TaskKind>,
        language: Option<String>,
        tone: Option<String>,
        text: Option<String>,
    ) -> Result<()> {
        let runtime = Runtime::open(config)?;
        let text = text_or_stdin(text)?;
        run_with(&runtime, task, language, tone, text, std::io::stdout()).await?;
        Ok(())
    }

    /// Run a task against `runtime`, rendering into `out`
    ///
    /// # Errors
    ///
    /// Returns error for tasks that need input a single shot cannot give
    /// (`ask`, `quiz_solver`, `vision`, `read`), or when the session
    /// reported a failure.
    pub async fn run_with<W: Write + Send>(
        runtime: &Runtime,
        task: Option<TaskKind>,
        language: Option<String>,
        tone: Option<String>,
        text: String,
        out: W,
    ) -> Result<W> {
        let settings = runtime.settings()?;
        let kind = task.unwrap_or(settings.default_task);
        if kind.awaits_input() || matches!(kind, TaskKind::Vision | TaskKind::Read) {
            return Err(RelaywizError::Config(format!(
                "{} cannot run as a single shot; use the chat, read or ocr commands",
                kind.short_name()
            ))
            .into());
        }

        tracing::info!(task = kind.short_name(), "Running task");
        let mut overlay = terminal_overlay(&settings, language);
        if let Some(tone) = tone {
            overlay = overlay.with_tone(tone);
        }

        let mut agent = runtime.agent(runtime.worker(None), overlay, out);
        agent
            .dispatch(OverlayEvent::ContextMenu {
                kind,
                text: Some(text),
            })
            .await?;
        agent.settle().await?;

        let renderer = agent.into_renderer();
        if let Some(error) = renderer.error() {
            return Err(RelaywizError::Provider(error.to_string()).into());
        }
        Ok(renderer.into_inner())
    }
}

/// Interactive chat
pub mod chat {
    //! Interactive chat handler.
    //!
    //! One conversation per invocation; every line is a new session on
    //! the same conversation id, so the relay replays earlier turns.

    use super::*;
    use crate::page::{OverlayEvent, OverlayState};
    use crate::relay::TaskKind;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start an interactive chat, optionally about `image`
    pub async fn run_chat(config: Config, image: Option<String>, language: Option<String>) -> Result<()> {
        let runtime = Runtime::open(config)?;
        let settings = runtime.settings()?;
        let overlay = terminal_overlay(&settings, language);
        let mut agent = runtime.agent(runtime.worker(None), overlay, std::io::stdout());
        let opening = opening_event(image);

        let mut rl = DefaultEditor::new()?;
        println!(
            "{}",
            "Chat started. Ctrl-C stops an answer; type 'exit' or press Ctrl-D to leave.".cyan()
        );

        loop {
            if matches!(agent.overlay().state(), OverlayState::Idle) {
                agent.dispatch(opening.clone()).await?;
            }

            match rl.readline("you> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if matches!(trimmed, "exit" | "quit") {
                        break;
                    }
                    rl.add_history_entry(trimmed)?;

                    agent
                        .dispatch(OverlayEvent::UserInput {
                            text: trimmed.to_string(),
                        })
                        .await?;
                    let stopped = tokio::select! {
                        settled = agent.settle() => {
                            settled?;
                            false
                        }
                        _ = tokio::signal::ctrl_c() => true,
                    };
                    if stopped {
                        agent.dispatch(OverlayEvent::Stop).await?;
                    }
                    println!();
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }

        agent.dispatch(OverlayEvent::ClickOutside).await?;
        Ok(())
    }

    /// Event that opens the chat popup
    pub fn opening_event(image: Option<String>) -> OverlayEvent {
        match image {
            Some(image_url) => OverlayEvent::ImageSelected { image_url },
            None => OverlayEvent::ContextMenu {
                kind: TaskKind::Ask,
                text: None,
            },
        }
    }
}

/// Read text aloud
pub mod read {
    //! Text-to-speech handler.

    use super::*;
    use crate::page::OverlayEvent;
    use crate::relay::TaskKind;
    use std::path::Path;

    /// Synthesize `text` (or stdin) into `output`
    pub async fn run_read(config: Config, output: &Path, text: Option<String>) -> Result<()> {
        let runtime = Runtime::open(config)?;
        let text = text_or_stdin(text)?;
        let audio = synthesize(&runtime, text).await?;

        tokio::fs::write(output, &audio).await?;
        println!(
            "{}",
            format!("Wrote {} bytes of audio to {}", audio.len(), output.display()).green()
        );
        Ok(())
    }

    /// Synthesize `text` through a read-aloud session
    pub async fn synthesize(runtime: &Runtime, text: String) -> Result<Vec<u8>> {
        let settings = runtime.settings()?;
        let overlay = terminal_overlay(&settings, None);
        let mut agent = runtime.agent(runtime.worker(None), overlay, std::io::sink());

        agent
            .dispatch(OverlayEvent::ContextMenu {
                kind: TaskKind::Read,
                text: Some(text),
            })
            .await?;
        agent.settle().await?;

        let renderer = agent.into_renderer();
        if let Some(error) = renderer.error() {
            return Err(RelaywizError::Provider(error.to_string()).into());
        }
        Ok(renderer.audio().to_vec())
    }
}

/// Screenshot recognition
pub mod ocr {
    //! OCR handler.
    //!
    //! Without `--solve` the image is only recognized. With it, the quiz
    //! flow runs end to end: the worker captures the file, the page agent
    //! sends it to the OCR service and asks the model for the answer.

    use super::*;
    use crate::ocr::OcrClient;
    use crate::page::OverlayEvent;
    use crate::relay::{FileCapture, TaskKind};
    use std::path::Path;

    /// Recognize (or solve) the quiz in `image`
    pub async fn run_ocr(config: Config, image: &Path, solve: bool) -> Result<()> {
        let ocr = OcrClient::new(&config.ocr)?;

        if !solve {
            let png = tokio::fs::read(image).await?;
            let text = ocr.recognize(png).await?;
            if text.trim().is_empty() {
                println!("{}", "No text found.".yellow());
            } else {
                println!("{}", text);
            }
            return Ok(());
        }

        let runtime = Runtime::open(config)?;
        solve_with(&runtime, ocr, image, std::io::stdout()).await?;
        Ok(())
    }

    /// Run the quiz-solver flow on `image`, rendering into `out`
    pub async fn solve_with<W: Write + Send>(
        runtime: &Runtime,
        ocr: OcrClient,
        image: &Path,
        out: W,
    ) -> Result<W> {
        let settings = runtime.settings()?;
        let capture: Arc<dyn Capture> = Arc::new(FileCapture::new(image));
        let overlay = terminal_overlay(&settings, None);
        let mut agent = runtime
            .agent(runtime.worker(Some(capture)), overlay, out)
            .with_ocr(ocr);

        agent
            .dispatch(OverlayEvent::Shortcut {
                kind: TaskKind::QuizSolver,
                text: None,
            })
            .await?;
        agent.settle().await?;

        let renderer = agent.into_renderer();
        if let Some(error) = renderer.error() {
            return Err(RelaywizError::Ocr(error.to_string()).into());
        }
        Ok(renderer.into_inner())
    }
}

/// API key management
pub mod auth {
    //! API key handler.

    use super::*;

    /// Store `key`, checking it against the provider unless `no_verify`
    pub async fn set_key(runtime: &Runtime, key: &str, no_verify: bool) -> Result<()> {
        let mut settings = runtime.settings()?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RelaywizError::MissingCredentials("openai".into()).into());
        }

        if !no_verify {
            tracing::info!(model = %settings.model, "Verifying API key");
            if !runtime.provider.validate_key(key, &settings.model).await? {
                return Err(RelaywizError::Provider("The API key was rejected".into()).into());
            }
        }

        settings.api_key = key.to_string();
        settings.save(runtime.store.as_ref())?;
        println!("{}", "API key saved.".green());
        Ok(())
    }

    /// Forget the stored key
    pub fn clear_key(runtime: &Runtime) -> Result<()> {
        Settings::clear_api_key(runtime.store.as_ref())?;
        println!("{}", "API key removed.".green());
        Ok(())
    }

    /// Print whether a key is stored
    pub fn status(runtime: &Runtime) -> Result<()> {
        let settings = runtime.settings()?;
        match settings.require_api_key() {
            Ok(key) => println!("API key stored ({})", mask_key(key).cyan()),
            Err(_) => println!("{}", "No API key stored.".yellow()),
        }
        Ok(())
    }

    /// Last four characters of `key`, the rest hidden
    pub fn mask_key(key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{}", tail)
    }
}

/// Settings management
pub mod settings {
    //! Settings handler.

    use super::*;
    use crate::relay::TaskKind;
    use prettytable::{format, row, Table};

    /// Fields changed by `settings set`
    #[derive(Debug, Default, Clone)]
    pub struct SettingsUpdate {
        /// Chat model
        pub model: Option<String>,
        /// Native language
        pub language: Option<String>,
        /// Popup mode
        pub popup_mode: Option<PopupMode>,
        /// Quick-action task
        pub default_task: Option<TaskKind>,
        /// Voice
        pub voice: Option<String>,
    }

    impl SettingsUpdate {
        /// Whether nothing would change
        pub fn is_empty(&self) -> bool {
            self.model.is_none()
                && self.language.is_none()
                && self.popup_mode.is_none()
                && self.default_task.is_none()
                && self.voice.is_none()
        }

        fn apply(self, settings: &mut Settings) {
            if let Some(model) = self.model {
                settings.model = model;
            }
            if let Some(language) = self.language {
                settings.native_lang = language;
            }
            if let Some(popup_mode) = self.popup_mode {
                settings.popup_mode = popup_mode;
            }
            if let Some(default_task) = self.default_task {
                settings.default_task = default_task;
            }
            if let Some(voice) = self.voice {
                settings.voice = voice;
            }
        }
    }

    /// Print the stored settings
    pub fn show(runtime: &Runtime, json: bool) -> Result<()> {
        let settings = runtime.settings()?;
        let api_key = if settings.api_key.is_empty() {
            "-".to_string()
        } else {
            super::auth::mask_key(&settings.api_key)
        };

        if json {
            let value = serde_json::json!({
                "apiKey": api_key,
                "model": settings.model,
                "nativeLang": settings.native_lang,
                "popupMode": settings.popup_mode.to_string(),
                "defaultTask": settings.default_task.short_name(),
                "voice": settings.voice,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
        table.add_row(row!["Setting".bold(), "Value".bold()]);
        table.add_row(row!["API key", api_key]);
        table.add_row(row!["Model", settings.model]);
        table.add_row(row!["Native language", settings.native_lang]);
        table.add_row(row!["Popup mode", settings.popup_mode]);
        table.add_row(row!["Default task", settings.default_task.short_name()]);
        table.add_row(row!["Voice", settings.voice]);
        table.printstd();
        Ok(())
    }

    /// Apply `update` and persist
    pub fn set(runtime: &Runtime, update: SettingsUpdate) -> Result<Settings> {
        if update.is_empty() {
            return Err(RelaywizError::Config("Nothing to change".into()).into());
        }
        let mut settings = runtime.settings()?;
        update.apply(&mut settings);
        settings.save(runtime.store.as_ref())?;
        tracing::info!(?settings, "Settings saved");
        println!("{}", "Settings saved.".green());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::TaskKind;
    use crate::storage::MemoryStore;
    use crate::test_utils::{sse_body, ScriptedProvider};

    fn runtime(provider: ScriptedProvider, api_key: &str) -> Runtime {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Settings {
            api_key: api_key.into(),
            ..Settings::default()
        }
        .save(store.as_ref())
        .unwrap();
        Runtime::new(Config::default(), store, Arc::new(provider))
    }

    #[tokio::test]
    async fn test_run_streams_answer_into_writer() {
        let runtime = runtime(
            ScriptedProvider::with_body(sse_body("c1", &["Bon", "jour"])),
            "sk-test",
        );
        let out = run::run_with(
            &runtime,
            Some(TaskKind::Translate),
            Some("fr".into()),
            None,
            "Hello".into(),
            Vec::new(),
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Bonjour\n");
    }

    #[tokio::test]
    async fn test_run_rejects_chat_tasks() {
        let runtime = runtime(ScriptedProvider::default(), "sk-test");
        let result = run::run_with(
            &runtime,
            Some(TaskKind::Ask),
            None,
            None,
            "Hi".into(),
            Vec::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_without_key_prints_key_message() {
        let runtime = runtime(ScriptedProvider::default(), "");
        let out = run::run_with(&runtime, None, None, None, "Hi".into(), Vec::new())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            crate::relay::INCORRECT_KEY_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_set_key_without_verification() {
        let runtime = runtime(ScriptedProvider::default(), "");
        auth::set_key(&runtime, " sk-new ", true).await.unwrap();
        assert_eq!(runtime.settings().unwrap().api_key, "sk-new");

        auth::clear_key(&runtime).unwrap();
        assert!(runtime.settings().unwrap().api_key.is_empty());
    }

    #[tokio::test]
    async fn test_set_empty_key_fails() {
        let runtime = runtime(ScriptedProvider::default(), "");
        assert!(auth::set_key(&runtime, "  ", true).await.is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(auth::mask_key("sk-abcdef1234"), "****1234");
        assert_eq!(auth::mask_key("abc"), "***");
    }

    #[test]
    fn test_settings_update() {
        let runtime = runtime(ScriptedProvider::default(), "sk-keep");
        let saved = settings::set(
            &runtime,
            settings::SettingsUpdate {
                language: Some("ja".into()),
                popup_mode: Some(PopupMode::Hide),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(saved.native_lang, "ja");

        let loaded = runtime.settings().unwrap();
        assert_eq!(loaded.popup_mode, PopupMode::Hide);
        assert_eq!(loaded.api_key, "sk-keep");
        assert!(settings::set(&runtime, settings::SettingsUpdate::default()).is_err());
    }

    #[test]
    fn test_runtime_settings_fall_back_to_configured_model() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.provider.model = "gpt-4o-mini".into();
        let runtime = Runtime::new(config, store, Arc::new(ScriptedProvider::default()));
        assert_eq!(runtime.settings().unwrap().model, "gpt-4o-mini");
    }

    #[test]
    fn test_chat_opening_event() {
        assert!(matches!(
            chat::opening_event(Some("https://x/cat.png".into())),
            crate::page::OverlayEvent::ImageSelected { .. }
        ));
        assert!(matches!(
            chat::opening_event(None),
            crate::page::OverlayEvent::ContextMenu {
                kind: TaskKind::Ask,
                ..
            }
        ));
    }

    #[test]
    fn test_terminal_renderer_collects_audio_and_errors() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        renderer.apply(&OverlayCommand::PlayAudio(vec![1, 2]));
        renderer.apply(&OverlayCommand::PlayAudio(vec![3]));
        renderer.apply(&OverlayCommand::ShowError("nope".into()));
        assert_eq!(renderer.audio(), &[1, 2, 3]);
        assert_eq!(renderer.error(), Some("nope"));
    }
}
