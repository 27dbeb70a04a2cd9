//! One request/response exchange over a channel
//!
//! A session builds the message list for its task, issues one streaming
//! request, relays decoded fragments to the page and, when an answer was
//! produced, persists it and sends the terminal event. Every failure is
//! reported to the page as a single fragment and ends the session; nothing
//! is retried.

use crate::error::Result;
use crate::providers::{Message, Provider, StreamOpening};
use crate::relay::decoder::StreamFragment;
use crate::relay::metrics::{SessionMetrics, SessionOutcome};
use crate::relay::port::ReplySender;
use crate::relay::protocol::{PageRequest, Reply};
use crate::relay::stream::fragments;
use crate::relay::task::Task;
use crate::storage::{ConversationLog, ConversationTurn, Question};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Token sent when the provider rejects the request
pub const INCORRECT_KEY_MESSAGE: &str = "Incorrect API key. Please update API key!";

/// Token sent when a session is cancelled before the response arrives
pub const STOPPED_MESSAGE: &str = "Stopped generate";

/// Token sent when the provider answers without a readable body
pub const STREAMING_UNSUPPORTED_MESSAGE: &str =
    "Streaming is not supported by this provider. Please check the API endpoint";

/// A stream request resolved at the session boundary
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    /// Text to send
    pub text: String,
    /// Resolved task
    pub task: Task,
    /// Target language code
    pub language: String,
    /// Conversation the answer is persisted under
    pub conversation_id: String,
}

impl SessionRequest {
    /// Resolve a page request, using `default_language` when none is given
    pub fn from_page(request: &PageRequest, default_language: &str) -> Self {
        let language = request
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(default_language)
            .to_string();

        Self {
            text: request.text.clone(),
            task: request.task(),
            language,
            conversation_id: request.uuid.clone(),
        }
    }
}

/// Collaborators a session needs
#[derive(Clone)]
pub struct SessionContext {
    /// Chat backend
    pub provider: Arc<dyn Provider>,
    /// Conversation history
    pub history: ConversationLog,
    /// Decrypted credential
    pub api_key: String,
    /// Chat model
    pub model: String,
}

/// Assemble the message list for `request` and the question to persist
///
/// Chat tasks replay `history` (oldest first, at most the log cap) as
/// alternating user/assistant entries. A vision request without history
/// sends one two-part user message.
pub fn build_messages(
    request: &SessionRequest,
    history: &[ConversationTurn],
) -> (Vec<Message>, Question) {
    let mut messages = vec![Message::system(
        request.task.system_prompt(&request.language),
    )];

    if request.task.history_id().is_some() {
        for turn in history {
            messages.push(Message::user(turn.question.clone()));
            messages.push(Message::assistant(turn.answer.clone()));
        }
    }

    match &request.task {
        Task::Vision {
            image_url: Some(image_url),
            ..
        } if history.is_empty() => {
            let question = Question::with_image(request.text.trim(), image_url.clone());
            messages.push(Message::user(question.clone()));
            (messages, question)
        }
        _ => {
            messages.push(Message::user(request.text.trim()));
            (messages, Question::Text(request.text.clone()))
        }
    }
}

/// Run one session, posting replies through `replies`
///
/// Returns how the session ended; the page has already been told.
pub async fn run_session(
    context: &SessionContext,
    request: SessionRequest,
    replies: &ReplySender,
    cancel: CancellationToken,
) -> SessionOutcome {
    let kind = request.task.kind();
    let metrics = SessionMetrics::new(kind.wire_name());

    let port = replies.port_name().to_string();
    let error_fragment =
        |token: String| replies.send(Reply::fragment(&port, kind, None, token));

    tracing::info!(
        port = %port,
        task = %kind,
        language = %request.language,
        conversation_id = %request.conversation_id,
        "Starting session"
    );

    let outcome = match relay(context, &request, replies, &cancel, &metrics).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(port = %port, "Session failed: {:#}", e);
            error_fragment(e.to_string());
            SessionOutcome::Failed
        }
    };

    match outcome {
        SessionOutcome::Rejected => {
            error_fragment(INCORRECT_KEY_MESSAGE.to_string());
        }
        SessionOutcome::NoBody => {
            error_fragment(STREAMING_UNSUPPORTED_MESSAGE.to_string());
        }
        _ => {}
    }

    tracing::info!(port = %port, outcome = outcome.as_str(), "Session finished");
    metrics.record_outcome(outcome);
    outcome
}

async fn relay(
    context: &SessionContext,
    request: &SessionRequest,
    replies: &ReplySender,
    cancel: &CancellationToken,
    metrics: &SessionMetrics,
) -> Result<SessionOutcome> {
    let kind = request.task.kind();
    let port = replies.port_name();

    if context.api_key.is_empty() {
        tracing::warn!(port = %port, "No API key stored");
        return Ok(SessionOutcome::Rejected);
    }

    let history = match request.task.history_id() {
        Some(conversation_id) => context.history.get(conversation_id)?,
        None => Vec::new(),
    };
    let (messages, question) = build_messages(request, &history);

    let opening = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            replies.send(Reply::fragment(port, kind, None, STOPPED_MESSAGE.to_string()));
            return Ok(SessionOutcome::Cancelled);
        }
        opening = context.provider.open_chat_stream(&context.api_key, &context.model, &messages) => opening?,
    };

    let body = match opening {
        StreamOpening::Body(body) => body,
        StreamOpening::Rejected { status } => {
            tracing::warn!(port = %port, status, "Provider rejected request");
            return Ok(SessionOutcome::Rejected);
        }
        StreamOpening::NoBody => return Ok(SessionOutcome::NoBody),
    };

    let mut stream = Box::pin(fragments(body, cancel.clone()));
    let mut answer = String::new();
    let mut stream_id: Option<String> = None;
    let mut forwarded = 0u64;

    while let Some(item) = stream.next().await {
        let StreamFragment { id, token } = match item {
            Ok(fragment) => fragment,
            Err(e) => {
                metrics.record_fragments(forwarded);
                tracing::warn!(port = %port, "Stream interrupted: {}", e);
                return Err(e);
            }
        };

        stream_id.get_or_insert_with(|| id.clone());
        answer.push_str(&token);
        forwarded += 1;
        replies.send(Reply::fragment(port, kind, Some(id), token));
    }
    metrics.record_fragments(forwarded);

    if cancel.is_cancelled() {
        tracing::info!(port = %port, forwarded, "Session cancelled mid-stream");
        replies.disconnect();
        return Ok(SessionOutcome::Cancelled);
    }

    if answer.is_empty() {
        return Ok(SessionOutcome::Empty);
    }

    let turn = ConversationTurn { question, answer };
    context
        .history
        .append(&request.conversation_id, turn.clone())?;

    replies.send(Reply::done(
        port,
        kind,
        stream_id.unwrap_or_default(),
        request.conversation_id.clone(),
        turn,
    ));
    Ok(SessionOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::port::{channel, PagePort, WorkerPort};
    use crate::relay::protocol::ReplyStatus;
    use crate::relay::task::TaskKind;
    use crate::test_utils::{memory_history, sse_body, ScriptedProvider};

    fn context(provider: Arc<ScriptedProvider>, history: &ConversationLog) -> SessionContext {
        SessionContext {
            provider,
            history: history.clone(),
            api_key: "sk-test".to_string(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }

    fn ports() -> (PagePort, WorkerPort) {
        channel("content-script-conv", 1)
    }

    fn drain(page: &mut PagePort) -> Vec<Reply> {
        std::iter::from_fn(|| page.try_recv()).collect()
    }

    fn request(kind: TaskKind, text: &str) -> SessionRequest {
        SessionRequest {
            text: text.to_string(),
            task: Task::resolve(kind, "conv", None, None),
            language: "en".to_string(),
            conversation_id: "conv".to_string(),
        }
    }

    #[test]
    fn test_grammar_builds_system_and_user() {
        let (messages, question) = build_messages(&request(TaskKind::Grammar, "He go to school"), &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            Message::system(
                "You will be given statements. Your task is to correct them to standard grammar"
            )
        );
        assert_eq!(messages[1], Message::user("He go to school"));
        assert_eq!(question, Question::from("He go to school"));
    }

    #[test]
    fn test_user_text_is_trimmed_but_question_is_not() {
        let (messages, question) = build_messages(&request(TaskKind::Translate, "  hola \n"), &[]);
        assert_eq!(messages[1].text(), "hola");
        assert_eq!(question, Question::from("  hola \n"));
    }

    #[test]
    fn test_ask_interleaves_history() {
        let history = vec![
            ConversationTurn::new("q1", "a1"),
            ConversationTurn::new("q2", "a2"),
        ];
        let (messages, _) = build_messages(&request(TaskKind::Ask, "q3"), &history);

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(
            roles,
            vec!["system", "user", "assistant", "user", "assistant", "user"]
        );
        assert_eq!(messages[0].text(), "You are a helpful assistant");
        assert_eq!(messages[1].text(), "q1");
        assert_eq!(messages[4].text(), "a2");
        assert_eq!(messages[5].text(), "q3");
    }

    #[test]
    fn test_single_shot_ignores_history() {
        let history = vec![ConversationTurn::new("q1", "a1")];
        let (messages, _) = build_messages(&request(TaskKind::Explain, "x"), &history);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_vision_without_history_sends_two_parts() {
        let req = SessionRequest {
            text: "What is this?".into(),
            task: Task::resolve(TaskKind::Vision, "conv", None, Some("data:image/png;base64,AA".into())),
            language: "en".into(),
            conversation_id: "conv".into(),
        };
        let (messages, question) = build_messages(&req, &[]);

        assert_eq!(messages.len(), 2);
        assert_eq!(
            question,
            Question::with_image("What is this?", "data:image/png;base64,AA")
        );
        assert_eq!(messages[1], Message::user(question));
    }

    #[test]
    fn test_vision_with_history_sends_plain_text() {
        let req = SessionRequest {
            text: "And now?".into(),
            task: Task::resolve(TaskKind::Vision, "conv", None, Some("data:x".into())),
            language: "en".into(),
            conversation_id: "conv".into(),
        };
        let history = vec![ConversationTurn::new(
            Question::with_image("What is this?", "data:x"),
            "A cat",
        )];
        let (messages, question) = build_messages(&req, &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(question, Question::from("And now?"));
        assert_eq!(messages[3], Message::user("And now?"));
    }

    #[test]
    fn test_from_page_defaults_language() {
        let mut page = PageRequest::stream("hi", "u1", TaskKind::Summarize, "");
        page.language = None;
        let req = SessionRequest::from_page(&page, "vi");
        assert_eq!(req.language, "vi");
        assert_eq!(req.task, Task::Summarize);
        assert_eq!(req.conversation_id, "u1");
    }

    #[tokio::test]
    async fn test_completed_session_persists_and_ends_with_done() {
        let provider = Arc::new(ScriptedProvider::with_body(sse_body("c1", &["Bon", "jour"])));
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, SessionOutcome::Completed);

        let replies = drain(&mut page);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].message.token.as_deref(), Some("Bon"));
        assert_eq!(replies[0].message.id.as_deref(), Some("c1"));
        assert_eq!(replies[1].message.token.as_deref(), Some("jour"));
        assert!(replies[2].is_done());
        assert_eq!(replies[2].message.chat, Some(ConversationTurn::new("Hello", "Bonjour")));

        let turns = history.get("conv").unwrap();
        assert_eq!(turns.last().unwrap(), &ConversationTurn::new("Hello", "Bonjour"));
    }

    #[tokio::test]
    async fn test_rejected_status_sends_single_fragment() {
        let provider = Arc::new(ScriptedProvider::rejected(401));
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Rejected);
        let replies = drain(&mut page);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message.token.as_deref(), Some(INCORRECT_KEY_MESSAGE));
        assert_eq!(replies[0].status(), Some(ReplyStatus::Stream));
        assert!(history.get("conv").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_body_sends_unsupported_message() {
        let provider = Arc::new(ScriptedProvider::no_body());
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Explain, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SessionOutcome::NoBody);
        let replies = drain(&mut page);
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].message.token.as_deref(),
            Some(STREAMING_UNSUPPORTED_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_empty_answer_sends_nothing() {
        let provider = Arc::new(ScriptedProvider::with_body(sse_body("c1", &[])));
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Empty);
        assert!(drain(&mut page).is_empty());
        assert!(history.get("conv").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_reports_incorrect_key_without_request() {
        let provider = Arc::new(ScriptedProvider::with_body(sse_body("c1", &["x"])));
        let history = memory_history();
        let mut ctx = context(Arc::clone(&provider), &history);
        ctx.api_key.clear();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &ctx,
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Rejected);
        assert!(provider.requests().is_empty());
        assert_eq!(
            drain(&mut page)[0].message.token.as_deref(),
            Some(INCORRECT_KEY_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_send_failure_reports_raw_error() {
        let provider = Arc::new(ScriptedProvider::failing("connection refused"));
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Failed);
        let replies = drain(&mut page);
        assert_eq!(replies.len(), 1);
        assert!(replies[0]
            .message
            .token
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_body_error_mid_stream_sends_raw_error_once() {
        let mut chunks = sse_body("c1", &["Bon", "jour"]);
        chunks.pop();
        let provider = Arc::new(ScriptedProvider::breaking_after(chunks, "connection reset"));
        let history = memory_history();
        let (mut page, worker) = ports();

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, SessionOutcome::Failed);

        let replies = drain(&mut page);
        let tokens: Vec<&str> = replies
            .iter()
            .map(|r| r.message.token.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(tokens, vec!["Bon", "jour", "Provider error: connection reset"]);
        assert!(replies.iter().all(|r| !r.is_done()));
        assert_eq!(replies[2].status(), Some(ReplyStatus::Stream));
        assert!(history.get("conv").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_response_sends_stopped() {
        let provider = Arc::new(ScriptedProvider::stalled());
        let history = memory_history();
        let (mut page, worker) = ports();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = run_session(
            &context(provider, &history),
            request(TaskKind::Translate, "Hello"),
            &worker.sender(),
            cancel,
        )
        .await;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        let replies = drain(&mut page);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message.token.as_deref(), Some(STOPPED_MESSAGE));
    }

    #[tokio::test]
    async fn test_cancel_after_two_fragments_skips_done_and_persistence() {
        let mut chunks = sse_body("c1", &["one ", "two "]);
        chunks.pop();
        let provider = Arc::new(ScriptedProvider::stalling_after(chunks));
        let history = memory_history();
        let (mut page, worker) = ports();
        let cancel = CancellationToken::new();

        let ctx = context(provider, &history);
        let replies = worker.sender();
        let session_cancel = cancel.clone();
        let session = tokio::spawn(async move {
            run_session(&ctx, request(TaskKind::Ask, "count"), &replies, session_cancel).await
        });

        for expected in ["one ", "two "] {
            let reply = page.recv().await.unwrap();
            assert_eq!(reply.message.token.as_deref(), Some(expected));
        }
        cancel.cancel();

        assert_eq!(session.await.unwrap(), SessionOutcome::Cancelled);
        assert!(page.recv().await.is_none());
        assert!(history.get("conv").unwrap().is_empty());
        drop(worker);
    }

    #[tokio::test]
    async fn test_ask_replays_persisted_history() {
        let provider = Arc::new(ScriptedProvider::with_body(sse_body("c1", &["fine"])));
        let history = memory_history();
        history
            .append("conv", ConversationTurn::new("how are you?", "good"))
            .unwrap();
        let (_page, worker) = ports();

        run_session(
            &context(Arc::clone(&provider), &history),
            request(TaskKind::Ask, "and now?"),
            &worker.sender(),
            CancellationToken::new(),
        )
        .await;

        let sent = &provider.requests()[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1], Message::user("how are you?"));
        assert_eq!(sent[2], Message::assistant("good"));
        assert_eq!(sent[3], Message::user("and now?"));
        assert_eq!(history.get("conv").unwrap().len(), 2);
    }
}
