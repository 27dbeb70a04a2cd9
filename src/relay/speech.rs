//! Read-aloud sessions
//!
//! Audio arrives as opaque chunks; each one is forwarded base64-encoded
//! under the `read` action, followed by a `done` once the body ends.

use crate::providers::{Provider, StreamOpening};
use crate::relay::metrics::{SessionMetrics, SessionOutcome};
use crate::relay::port::ReplySender;
use crate::relay::protocol::{Reply, ReplyAction};
use crate::relay::session::{INCORRECT_KEY_MESSAGE, STOPPED_MESSAGE, STREAMING_UNSUPPORTED_MESSAGE};
use crate::relay::task::TaskKind;
use base64::Engine;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Read `text` aloud with `voice`, forwarding audio through `replies`
pub async fn run_read(
    provider: &dyn Provider,
    api_key: &str,
    voice: &str,
    text: &str,
    replies: &ReplySender,
    cancel: CancellationToken,
) -> SessionOutcome {
    let metrics = SessionMetrics::new(TaskKind::Read.wire_name());
    let port = replies.port_name();
    let stop = |token: &str| replies.send(Reply::stop(port, ReplyAction::Read, token.to_string()));

    if api_key.is_empty() {
        stop(INCORRECT_KEY_MESSAGE);
        metrics.record_outcome(SessionOutcome::Rejected);
        return SessionOutcome::Rejected;
    }

    tracing::info!(port = %port, voice, "Starting read-aloud");

    let opening = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            stop(STOPPED_MESSAGE);
            metrics.record_outcome(SessionOutcome::Cancelled);
            return SessionOutcome::Cancelled;
        }
        opening = provider.open_speech_stream(api_key, text, voice) => opening,
    };

    let mut body = match opening {
        Ok(StreamOpening::Body(body)) => body,
        Ok(StreamOpening::Rejected { status }) => {
            tracing::warn!(port = %port, status, "Speech request rejected");
            stop(INCORRECT_KEY_MESSAGE);
            metrics.record_outcome(SessionOutcome::Rejected);
            return SessionOutcome::Rejected;
        }
        Ok(StreamOpening::NoBody) => {
            stop(STREAMING_UNSUPPORTED_MESSAGE);
            metrics.record_outcome(SessionOutcome::NoBody);
            return SessionOutcome::NoBody;
        }
        Err(e) => {
            tracing::error!(port = %port, "Speech request failed: {:#}", e);
            stop(&e.to_string());
            metrics.record_outcome(SessionOutcome::Failed);
            return SessionOutcome::Failed;
        }
    };

    let mut chunks = 0u64;
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break SessionOutcome::Cancelled,
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                chunks += 1;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                replies.send(Reply::audio_chunk(port, encoded));
            }
            Some(Err(e)) => {
                tracing::warn!(port = %port, "Audio stream interrupted: {}", e);
                stop(&e.to_string());
                break SessionOutcome::Failed;
            }
            None => {
                replies.send(Reply::audio_done(port));
                break SessionOutcome::Completed;
            }
        }
    };

    metrics.record_fragments(chunks);
    metrics.record_outcome(outcome);
    tracing::info!(port = %port, chunks, outcome = outcome.as_str(), "Read-aloud finished");
    outcome
}
