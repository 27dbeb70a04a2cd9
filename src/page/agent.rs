//! Page agent
//!
//! Drives an [`Overlay`] against a [`RelayWorker`]: every session gets its
//! own channel, replies are turned back into overlay events, and whatever
//! the overlay asks to show is handed to a [`Renderer`].

use crate::error::{Result, RelaywizError};
use crate::ocr::OcrClient;
use crate::page::overlay::{Overlay, OverlayCommand, OverlayEvent};
use crate::relay::capture::decode_data_url;
use crate::relay::port::{PagePort, TabId};
use crate::relay::protocol::{PageRequest, Reply, ReplyAction, ReplyStatus};
use crate::relay::worker::RelayWorker;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Prefix of every channel the agent opens
pub const PORT_PREFIX: &str = "content-script";

/// Presentation side of the overlay
pub trait Renderer: Send {
    /// Show the effect of `command`
    fn apply(&mut self, command: &OverlayCommand);
}

/// Renderer that keeps every command it receives
#[derive(Debug, Default, Clone)]
pub struct RecordingRenderer {
    /// Commands in the order they were applied
    pub commands: Vec<OverlayCommand>,
}

impl RecordingRenderer {
    /// Concatenated tokens of all `AppendToken` commands
    pub fn answer(&self) -> String {
        self.commands
            .iter()
            .filter_map(|c| match c {
                OverlayCommand::AppendToken { token, .. } => Some(token.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn apply(&mut self, command: &OverlayCommand) {
        self.commands.push(command.clone());
    }
}

/// One tab's page agent
pub struct PageAgent<R: Renderer> {
    worker: Arc<RelayWorker>,
    tab: TabId,
    overlay: Overlay,
    renderer: R,
    ocr: Option<OcrClient>,
    port: Option<PagePort>,
}

impl<R: Renderer> PageAgent<R> {
    /// Create an agent for `tab`
    pub fn new(worker: Arc<RelayWorker>, tab: TabId, overlay: Overlay, renderer: R) -> Self {
        Self {
            worker,
            tab,
            overlay,
            renderer,
            ocr: None,
            port: None,
        }
    }

    /// Recognize quiz captures with `ocr`
    pub fn with_ocr(mut self, ocr: OcrClient) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Overlay state
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Renderer
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Consume the agent, returning its renderer
    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Whether a session channel is open
    pub fn has_port(&self) -> bool {
        self.port.is_some()
    }

    /// Feed `event` to the overlay and carry out the resulting commands
    ///
    /// Commands that produce further events (captures) are followed
    /// through before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if a request cannot be posted to the worker
    pub async fn dispatch(&mut self, event: OverlayEvent) -> Result<()> {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for command in self.overlay.handle(event) {
                if let Some(follow_up) = self.execute(command).await? {
                    pending.push_back(follow_up);
                }
            }
        }
        Ok(())
    }

    /// Wait for the next reply of the open session and apply it
    ///
    /// Returns `false` when there is no session channel or it has closed.
    pub async fn pump(&mut self) -> Result<bool> {
        let Some(port) = self.port.as_mut() else {
            return Ok(false);
        };

        match port.recv().await {
            Some(reply) => {
                if let Some(event) = reply_event(reply) {
                    self.dispatch(event).await?;
                }
                Ok(true)
            }
            None => {
                tracing::debug!(tab = self.tab, "Session channel closed by worker");
                self.port = None;
                self.dispatch(OverlayEvent::Closed).await?;
                Ok(false)
            }
        }
    }

    /// Pump replies until the session finishes or its channel closes
    pub async fn settle(&mut self) -> Result<()> {
        while self.overlay.has_live_session() && self.pump().await? {}
        Ok(())
    }

    async fn execute(&mut self, command: OverlayCommand) -> Result<Option<OverlayEvent>> {
        match command {
            OverlayCommand::OpenSession(request) => {
                self.open_session(request)?;
                Ok(None)
            }
            OverlayCommand::Abort => {
                self.abort();
                Ok(None)
            }
            OverlayCommand::RequestCapture => Ok(Some(match self.capture_text().await {
                Ok(text) => OverlayEvent::OcrText(text),
                Err(e) => {
                    tracing::warn!(tab = self.tab, "Quiz capture failed: {:#}", e);
                    OverlayEvent::Failed(e.to_string())
                }
            })),
            OverlayCommand::Teardown => {
                self.port = None;
                self.renderer.apply(&OverlayCommand::Teardown);
                Ok(None)
            }
            OverlayCommand::ForgetConversation(id) => {
                if let Err(e) = self.worker.history().clear(&id) {
                    tracing::warn!(conversation = %id, "Failed to forget conversation: {:#}", e);
                }
                Ok(None)
            }
            other => {
                self.renderer.apply(&other);
                Ok(None)
            }
        }
    }

    fn open_session(&mut self, request: PageRequest) -> Result<()> {
        if self.port.is_some() {
            // a replaced session is always aborted first; anything left is finished
            self.port = None;
        }

        let id = if request.uuid.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request.uuid.clone()
        };
        let port = self.worker.connect(&port_name(&id), self.tab);
        tracing::debug!(port = port.name(), action = ?request.action, "Opening session");
        port.post(request)?;
        self.port = Some(port);
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(port) = self.port.take() {
            tracing::debug!(port = port.name(), "Aborting session");
            if let Err(e) = port.post(PageRequest::abort()) {
                tracing::debug!("Abort not delivered: {:#}", e);
            }
        }
    }

    async fn capture_text(&mut self) -> Result<String> {
        let ocr = self
            .ocr
            .clone()
            .ok_or_else(|| RelaywizError::Ocr("No OCR service configured".into()))?;

        let mut port = self
            .worker
            .connect(&port_name(&Uuid::new_v4().to_string()), self.tab);
        port.post(PageRequest::capture())?;

        let data_url = loop {
            let reply = port
                .recv()
                .await
                .ok_or_else(|| RelaywizError::Channel("Capture channel closed".into()))?;
            if reply.action != ReplyAction::Capture {
                continue;
            }
            if reply.status() == Some(ReplyStatus::Stop) {
                return Err(RelaywizError::Channel(reply.message.token.unwrap_or_default()).into());
            }
            break reply
                .message
                .data_url
                .ok_or_else(|| RelaywizError::Channel("Capture reply without image".into()))?;
        };
        drop(port);

        let png = decode_data_url(&data_url)?;
        ocr.recognize(png).await
    }
}

fn port_name(id: &str) -> String {
    format!("{}-{}", PORT_PREFIX, id)
}

/// Overlay event carried by a worker reply, if any
fn reply_event(reply: Reply) -> Option<OverlayEvent> {
    let status = reply.status();
    let message = reply.message;

    match (reply.action, status) {
        (_, Some(ReplyStatus::Stop)) => {
            Some(OverlayEvent::Failed(message.token.unwrap_or_default()))
        }
        (ReplyAction::Stream, Some(ReplyStatus::Done)) | (ReplyAction::Read, Some(ReplyStatus::Done)) => {
            Some(OverlayEvent::Terminal {
                id: message.id.unwrap_or_default(),
            })
        }
        (ReplyAction::Stream, _) => message.token.map(|token| OverlayEvent::Fragment {
            id: message.id.unwrap_or_default(),
            token,
        }),
        (ReplyAction::Read, _) => {
            let chunk = message.base64_chunk?;
            match base64::engine::general_purpose::STANDARD.decode(chunk) {
                Ok(bytes) => Some(OverlayEvent::Audio(bytes)),
                Err(e) => {
                    tracing::warn!("Dropping undecodable audio chunk: {}", e);
                    None
                }
            }
        }
        (ReplyAction::Capture, _) => None,
    }
}
