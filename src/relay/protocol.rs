//! Channel envelopes exchanged between the page agent and the relay worker
//!
//! Page → worker: [`PageRequest`], a flat object whose `action` selects
//! the operation. Worker → page: [`Reply`], an
//! `{action, portName, message}` envelope.

use crate::relay::task::{Task, TaskKind};
use crate::storage::ConversationTurn;
use serde::{Deserialize, Serialize};

/// Operations a page may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageAction {
    /// Start a streaming completion
    Stream,
    /// Cancel the tab's in-flight request
    Abort,
    /// Capture the visible page as a PNG data URL
    Capture,
    /// Read text aloud
    Read,
}

/// Inbound message from a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Requested operation
    pub action: PageAction,
    /// Selected or typed text
    #[serde(default)]
    pub text: String,
    /// Session / conversation id
    #[serde(default)]
    pub uuid: String,
    /// Wire task name, e.g. `chatgpt-translate`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Target language code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Tone for prompt tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    /// Image reference for vision tasks
    #[serde(default, alias = "src", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PageRequest {
    /// A `stream` request
    pub fn stream(
        text: impl Into<String>,
        uuid: impl Into<String>,
        kind: TaskKind,
        language: impl Into<String>,
    ) -> Self {
        Self {
            action: PageAction::Stream,
            text: text.into(),
            uuid: uuid.into(),
            task_type: Some(kind.wire_name().to_string()),
            language: Some(language.into()),
            tone: None,
            image: None,
        }
    }

    /// An `abort` request
    pub fn abort() -> Self {
        Self::bare(PageAction::Abort)
    }

    /// A `capture` request
    pub fn capture() -> Self {
        Self::bare(PageAction::Capture)
    }

    /// A `read` request for `text`
    pub fn read(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            task_type: Some(TaskKind::Read.wire_name().to_string()),
            ..Self::bare(PageAction::Read)
        }
    }

    /// Set the tone
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    /// Set the image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    fn bare(action: PageAction) -> Self {
        Self {
            action,
            text: String::new(),
            uuid: String::new(),
            task_type: None,
            language: None,
            tone: None,
            image: None,
        }
    }

    /// Resolved task kind; absent or unknown types resolve to translate
    pub fn task_kind(&self) -> TaskKind {
        self.task_type
            .as_deref()
            .map(TaskKind::from_wire)
            .unwrap_or_default()
    }

    /// Resolve the data-carrying task
    pub fn task(&self) -> Task {
        Task::resolve(
            self.task_kind(),
            &self.uuid,
            self.tone.clone(),
            self.image.clone(),
        )
    }
}

/// Reply envelope actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyAction {
    /// Chat-completion fragment or terminal event
    Stream,
    /// Screen capture result
    Capture,
    /// Audio chunk or terminal event
    Read,
}

/// Reply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// More to come
    Stream,
    /// Session finished successfully
    Done,
    /// Session stopped without finishing
    Stop,
}

/// Body of a [`Reply`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    /// Reply status; absent on capture replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplyStatus>,
    /// Content delta or error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Provider stream id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Conversation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Persisted turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ConversationTurn>,
    /// Wire task name
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Base64-encoded audio chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_chunk: Option<String>,
    /// Captured page image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

/// Outbound message to a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    /// Which request this answers
    pub action: ReplyAction,
    /// Channel the reply travels on
    pub port_name: String,
    /// Payload
    pub message: ReplyMessage,
}

impl Reply {
    fn new(action: ReplyAction, port_name: &str, message: ReplyMessage) -> Self {
        Self {
            action,
            port_name: port_name.to_string(),
            message,
        }
    }

    /// A content fragment; `id` is absent for error tokens
    pub fn fragment(port_name: &str, kind: TaskKind, id: Option<String>, token: String) -> Self {
        Self::new(
            ReplyAction::Stream,
            port_name,
            ReplyMessage {
                status: Some(ReplyStatus::Stream),
                id,
                token: Some(token),
                task_type: Some(kind.wire_name().to_string()),
                ..ReplyMessage::default()
            },
        )
    }

    /// The terminal event of a successful session
    pub fn done(
        port_name: &str,
        kind: TaskKind,
        id: String,
        uuid: String,
        chat: ConversationTurn,
    ) -> Self {
        Self::new(
            ReplyAction::Stream,
            port_name,
            ReplyMessage {
                status: Some(ReplyStatus::Done),
                id: Some(id),
                uuid: Some(uuid),
                chat: Some(chat),
                task_type: Some(kind.wire_name().to_string()),
                ..ReplyMessage::default()
            },
        )
    }

    /// One audio chunk
    pub fn audio_chunk(port_name: &str, base64_chunk: String) -> Self {
        Self::new(
            ReplyAction::Read,
            port_name,
            ReplyMessage {
                status: Some(ReplyStatus::Stream),
                base64_chunk: Some(base64_chunk),
                ..ReplyMessage::default()
            },
        )
    }

    /// All audio chunks sent
    pub fn audio_done(port_name: &str) -> Self {
        Self::new(
            ReplyAction::Read,
            port_name,
            ReplyMessage {
                status: Some(ReplyStatus::Done),
                ..ReplyMessage::default()
            },
        )
    }

    /// Read-aloud or capture stopped with `token` as the reason
    pub fn stop(port_name: &str, action: ReplyAction, token: String) -> Self {
        Self::new(
            action,
            port_name,
            ReplyMessage {
                status: Some(ReplyStatus::Stop),
                token: Some(token),
                ..ReplyMessage::default()
            },
        )
    }

    /// Captured page image
    pub fn capture(port_name: &str, data_url: String) -> Self {
        Self::new(
            ReplyAction::Capture,
            port_name,
            ReplyMessage {
                data_url: Some(data_url),
                ..ReplyMessage::default()
            },
        )
    }

    /// Status of the reply, if any
    pub fn status(&self) -> Option<ReplyStatus> {
        self.message.status
    }

    /// Whether this is the terminal event of a chat session
    pub fn is_done(&self) -> bool {
        self.message.status == Some(ReplyStatus::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_stream_request() {
        let raw = json!({
            "action": "stream",
            "text": "He go to school",
            "uuid": "abc",
            "type": "chatgpt-grammar",
            "language": "en"
        });
        let request: PageRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.action, PageAction::Stream);
        assert_eq!(request.task_kind(), TaskKind::Grammar);
        assert_eq!(request.task(), Task::Grammar);
    }

    #[test]
    fn test_parse_abort_without_fields() {
        let request: PageRequest = serde_json::from_value(json!({"action": "abort"})).unwrap();
        assert_eq!(request, PageRequest::abort());
        assert_eq!(request.task_kind(), TaskKind::Translate);
    }

    #[test]
    fn test_image_accepts_src_alias() {
        let request: PageRequest = serde_json::from_value(json!({
            "action": "stream",
            "type": "chatgpt-vision",
            "uuid": "v",
            "src": "data:image/png;base64,AA"
        }))
        .unwrap();
        assert_eq!(
            request.task(),
            Task::Vision {
                conversation_id: "v".into(),
                image_url: Some("data:image/png;base64,AA".into())
            }
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_value::<PageRequest>(json!({"action": "dance"})).is_err());
    }

    #[test]
    fn test_fragment_wire_shape() {
        let reply = Reply::fragment(
            "content-script-1",
            TaskKind::Explain,
            Some("chatcmpl-1".into()),
            "Hel".into(),
        );
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "action": "stream",
                "portName": "content-script-1",
                "message": {
                    "status": "stream",
                    "token": "Hel",
                    "id": "chatcmpl-1",
                    "type": "chatgpt-explain"
                }
            })
        );
    }

    #[test]
    fn test_done_and_audio_wire_shape() {
        let done = Reply::done(
            "p",
            TaskKind::Ask,
            "id1".into(),
            "conv".into(),
            ConversationTurn::new("q", "a"),
        );
        let value = serde_json::to_value(&done).unwrap();
        assert_eq!(value["message"]["status"], "done");
        assert_eq!(value["message"]["chat"]["answer"], "a");
        assert!(done.is_done());

        let chunk = serde_json::to_value(Reply::audio_chunk("p", "AAEC".into())).unwrap();
        assert_eq!(chunk["action"], "read");
        assert_eq!(chunk["message"]["base64Chunk"], "AAEC");

        let capture = serde_json::to_value(Reply::capture("p", "data:x".into())).unwrap();
        assert_eq!(capture["message"], json!({"dataUrl": "data:x"}));
    }
}
