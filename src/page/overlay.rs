//! Overlay state machine
//!
//! Pure: [`Overlay::handle`] maps an [`OverlayEvent`] to the
//! [`OverlayCommand`]s the host must carry out, in order. The machine keeps
//! exactly one popup and at most one live session, and always emits
//! [`OverlayCommand::Abort`] before a new session replaces a live one.

use crate::relay::protocol::PageRequest;
use crate::relay::task::TaskKind;
use crate::storage::PopupMode;
use uuid::Uuid;

/// Something that happened on the page
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// The user selected text
    Selection {
        /// Selected text
        text: String,
    },
    /// A quick action was picked from the hover icon's menu
    QuickAction(TaskKind),
    /// A context-menu command was invoked
    ContextMenu {
        /// Command task
        kind: TaskKind,
        /// Selection at the time, if any
        text: Option<String>,
    },
    /// A keyboard shortcut was pressed
    Shortcut {
        /// Shortcut task
        kind: TaskKind,
        /// Selection at the time, if any
        text: Option<String>,
    },
    /// The user asked to discuss an image
    ImageSelected {
        /// Data URL or remote URL of the image
        image_url: String,
    },
    /// The user submitted text in a chat popup
    UserInput {
        /// Submitted text
        text: String,
    },
    /// OCR finished for a quiz capture
    OcrText(String),
    /// A session, capture or OCR failed
    Failed(String),
    /// Synthesized speech arrived
    Audio(Vec<u8>),
    /// A streamed token arrived
    Fragment {
        /// Stream id
        id: String,
        /// Token
        token: String,
    },
    /// The session finished
    Terminal {
        /// Stream id
        id: String,
    },
    /// The worker closed the channel without a terminal reply
    Closed,
    /// The target-language selector changed
    LanguageChanged(String),
    /// The user clicked outside the popup
    ClickOutside,
    /// The user pressed the stop-generation button
    Stop,
}

/// Something the host must do
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    /// Show the hover icon next to the selection
    ShowIcon {
        /// Selected text
        text: String,
    },
    /// Open a popup for `kind`
    OpenPopup(TaskKind),
    /// Open a channel and send this request
    OpenSession(PageRequest),
    /// Abort the live session and close its channel
    Abort,
    /// Ask the worker for a screen capture
    RequestCapture,
    /// Append a token to the answer node of stream `id`
    AppendToken {
        /// Stream id
        id: String,
        /// Token
        token: String,
    },
    /// Queue a chunk of MP3 audio for playback
    PlayAudio(Vec<u8>),
    /// Clear the last answer slot
    ClearAnswer,
    /// Make the answer node copyable
    EnableCopy,
    /// Tell the user something went wrong
    ShowError(String),
    /// Remove icon and popup
    Teardown,
    /// Delete the stored turns of a closed popup's conversation
    ForgetConversation(String),
}

/// Progress of the popup's current exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for user input, a capture or OCR
    AwaitingInput,
    /// Session opened, no token yet
    Waiting,
    /// Tokens arriving
    Streaming,
    /// Terminal event received
    Finalized,
}

/// The open popup
#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    /// Task the popup was opened for
    pub kind: TaskKind,
    /// Conversation id shared by all sessions of a chat popup
    pub conversation_id: String,
    /// Current phase
    pub phase: Phase,
    /// Text of the current or last session
    pub text: Option<String>,
    /// Image under discussion (vision)
    pub image_url: Option<String>,
}

impl Popup {
    fn session_live(&self) -> bool {
        matches!(self.phase, Phase::Waiting | Phase::Streaming)
    }

    /// Command deleting this popup's history, once a session was opened
    ///
    /// Read-aloud sessions store no turns.
    fn forget(&self) -> Option<OverlayCommand> {
        if self.text.is_none() || self.kind == TaskKind::Read {
            return None;
        }
        Some(OverlayCommand::ForgetConversation(self.conversation_id.clone()))
    }
}

/// Overlay states
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayState {
    /// Nothing shown
    Idle,
    /// Hover icon shown for a selection
    IconShown {
        /// Selected text
        text: String,
    },
    /// A popup is open
    PopupOpen(Popup),
}

/// The page overlay
#[derive(Debug, Clone)]
pub struct Overlay {
    state: OverlayState,
    popup_mode: PopupMode,
    default_task: TaskKind,
    language: String,
    tone: Option<String>,
}

impl Overlay {
    /// Create an idle overlay
    pub fn new(popup_mode: PopupMode, default_task: TaskKind, language: impl Into<String>) -> Self {
        Self {
            state: OverlayState::Idle,
            popup_mode,
            default_task,
            language: language.into(),
            tone: None,
        }
    }

    /// Use `tone` for prompt sessions
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    /// Current state
    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    /// Current target language
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Whether a session is open and not yet finished
    pub fn has_live_session(&self) -> bool {
        matches!(&self.state, OverlayState::PopupOpen(popup) if popup.session_live())
    }

    /// Apply `event`, returning the commands to carry out
    pub fn handle(&mut self, event: OverlayEvent) -> Vec<OverlayCommand> {
        tracing::trace!(?event, state = ?self.state, "Overlay event");
        match event {
            OverlayEvent::Selection { text } => self.on_selection(text),
            OverlayEvent::QuickAction(kind) => match &self.state {
                OverlayState::IconShown { text } => {
                    let text = text.clone();
                    self.open_popup(kind, Some(text))
                }
                _ => Vec::new(),
            },
            OverlayEvent::ContextMenu { kind, text } | OverlayEvent::Shortcut { kind, text } => {
                self.open_popup(kind, text)
            }
            OverlayEvent::ImageSelected { image_url } => {
                let mut commands = self.teardown();
                commands.push(OverlayCommand::OpenPopup(TaskKind::Vision));
                self.state = OverlayState::PopupOpen(Popup {
                    kind: TaskKind::Vision,
                    conversation_id: new_id(),
                    phase: Phase::AwaitingInput,
                    text: None,
                    image_url: Some(image_url),
                });
                commands
            }
            OverlayEvent::UserInput { text } => self.on_user_input(text),
            OverlayEvent::OcrText(text) => self.on_ocr_text(text),
            OverlayEvent::Failed(message) => match &self.state {
                OverlayState::PopupOpen(_) => {
                    let mut commands = vec![OverlayCommand::ShowError(message)];
                    commands.extend(self.teardown());
                    commands
                }
                _ => Vec::new(),
            },
            OverlayEvent::Audio(bytes) => match &mut self.state {
                OverlayState::PopupOpen(popup) if popup.session_live() => {
                    popup.phase = Phase::Streaming;
                    vec![OverlayCommand::PlayAudio(bytes)]
                }
                _ => Vec::new(),
            },
            OverlayEvent::Fragment { id, token } => match &mut self.state {
                OverlayState::PopupOpen(popup) if popup.session_live() => {
                    popup.phase = Phase::Streaming;
                    vec![OverlayCommand::AppendToken { id, token }]
                }
                _ => Vec::new(),
            },
            OverlayEvent::Terminal { .. } => self.on_terminal(),
            OverlayEvent::Closed => {
                if let OverlayState::PopupOpen(popup) = &mut self.state {
                    if popup.session_live() {
                        popup.phase = Phase::Finalized;
                    }
                }
                Vec::new()
            }
            OverlayEvent::LanguageChanged(language) => self.on_language_changed(language),
            OverlayEvent::ClickOutside => self.teardown(),
            OverlayEvent::Stop => self.on_stop(),
        }
    }

    fn on_selection(&mut self, text: String) -> Vec<OverlayCommand> {
        if matches!(self.state, OverlayState::PopupOpen(_)) {
            return self.teardown();
        }

        // a stale icon goes away whether or not the new selection gets one
        let mut commands = self.teardown();
        if text.trim().chars().count() <= 1 {
            return commands;
        }

        match self.popup_mode {
            PopupMode::Hide => {}
            PopupMode::DisplayIcon => {
                self.state = OverlayState::IconShown { text: text.clone() };
                commands.push(OverlayCommand::ShowIcon { text });
            }
            PopupMode::Immediately => {
                commands.extend(self.open_popup(self.default_task, Some(text)));
            }
        }
        commands
    }

    fn open_popup(&mut self, kind: TaskKind, text: Option<String>) -> Vec<OverlayCommand> {
        let mut commands = self.teardown();
        commands.push(OverlayCommand::OpenPopup(kind));

        let mut popup = Popup {
            kind,
            conversation_id: new_id(),
            phase: Phase::AwaitingInput,
            text: None,
            image_url: None,
        };

        let text = text.filter(|t| !t.trim().is_empty());
        match (kind, text) {
            (TaskKind::QuizSolver, _) => commands.push(OverlayCommand::RequestCapture),
            (TaskKind::Ask, _) | (_, None) => {}
            (_, Some(text)) => {
                commands.push(OverlayCommand::OpenSession(self.request(&popup, &text)));
                popup.phase = Phase::Waiting;
                popup.text = Some(text);
            }
        }

        self.state = OverlayState::PopupOpen(popup);
        commands
    }

    fn on_user_input(&mut self, text: String) -> Vec<OverlayCommand> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let OverlayState::PopupOpen(popup) = &self.state else {
            return Vec::new();
        };
        let mut popup = popup.clone();

        let mut commands = Vec::new();
        if popup.session_live() {
            commands.push(OverlayCommand::Abort);
        }
        commands.push(OverlayCommand::OpenSession(self.request(&popup, &text)));
        popup.phase = Phase::Waiting;
        popup.text = Some(text);
        self.state = OverlayState::PopupOpen(popup);
        commands
    }

    fn on_ocr_text(&mut self, text: String) -> Vec<OverlayCommand> {
        match &self.state {
            OverlayState::PopupOpen(popup)
                if popup.kind == TaskKind::QuizSolver && popup.phase == Phase::AwaitingInput =>
            {
                if text.trim().is_empty() {
                    tracing::debug!("OCR found no text, closing quiz popup");
                    return self.teardown();
                }
                self.on_user_input(text)
            }
            _ => Vec::new(),
        }
    }

    fn on_terminal(&mut self) -> Vec<OverlayCommand> {
        let OverlayState::PopupOpen(popup) = &mut self.state else {
            return Vec::new();
        };
        if !popup.session_live() {
            return Vec::new();
        }

        popup.phase = Phase::Finalized;
        let mut commands = vec![OverlayCommand::EnableCopy];
        if !popup.kind.is_chat() {
            commands.push(OverlayCommand::Teardown);
            commands.extend(popup.forget());
            self.state = OverlayState::Idle;
        }
        commands
    }

    fn on_stop(&mut self) -> Vec<OverlayCommand> {
        let OverlayState::PopupOpen(popup) = &mut self.state else {
            return Vec::new();
        };
        if !popup.session_live() {
            return Vec::new();
        }

        if matches!(popup.kind, TaskKind::Prompt | TaskKind::Read) {
            return self.teardown();
        }
        popup.phase = Phase::Finalized;
        vec![OverlayCommand::Abort]
    }

    fn on_language_changed(&mut self, language: String) -> Vec<OverlayCommand> {
        self.language = language;

        let OverlayState::PopupOpen(popup) = &self.state else {
            return Vec::new();
        };
        if !popup.session_live() {
            return Vec::new();
        }
        let Some(text) = popup.text.clone() else {
            return Vec::new();
        };

        let mut popup = popup.clone();
        let mut commands = vec![OverlayCommand::Abort, OverlayCommand::ClearAnswer];
        if !popup.kind.is_chat() {
            commands.extend(popup.forget());
            popup.conversation_id = new_id();
        }
        commands.push(OverlayCommand::OpenSession(self.request(&popup, &text)));

        popup.phase = Phase::Waiting;
        self.state = OverlayState::PopupOpen(popup);
        commands
    }

    /// Close everything, aborting a live session first
    fn teardown(&mut self) -> Vec<OverlayCommand> {
        let commands = match &self.state {
            OverlayState::Idle => Vec::new(),
            OverlayState::IconShown { .. } => vec![OverlayCommand::Teardown],
            OverlayState::PopupOpen(popup) => {
                let mut commands = Vec::new();
                if popup.session_live() {
                    commands.push(OverlayCommand::Abort);
                }
                commands.push(OverlayCommand::Teardown);
                commands.extend(popup.forget());
                commands
            }
        };
        self.state = OverlayState::Idle;
        commands
    }

    fn request(&self, popup: &Popup, text: &str) -> PageRequest {
        if popup.kind == TaskKind::Read {
            return PageRequest::read(text);
        }

        let mut request =
            PageRequest::stream(text, &popup.conversation_id, popup.kind, &self.language);
        if popup.kind == TaskKind::Prompt {
            if let Some(tone) = &self.tone {
                request = request.with_tone(tone);
            }
        }
        if let Some(image_url) = &popup.image_url {
            request = request.with_image(image_url);
        }
        request
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
