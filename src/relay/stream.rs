//! Lazy sequence of decoded fragments over a response body
//!
//! The sequence is finite and not restartable. Cancellation ends it early:
//! once the token fires no further body read is awaited and no pending
//! fragment is yielded. A transport error mid-read is yielded once as the
//! last item.

use crate::error::Result;
use crate::providers::ByteStream;
use crate::relay::decoder::{SseDecoder, StreamFragment};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;

struct FragmentState {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<StreamFragment>,
    cancel: CancellationToken,
    exhausted: bool,
}

/// Decode `body` into fragments until it ends, fails or `cancel` fires
pub fn fragments(
    body: ByteStream,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamFragment>> + Send {
    let state = FragmentState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        cancel,
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.cancel.is_cancelled() {
                tracing::debug!("Fragment stream cancelled");
                return None;
            }

            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }

            if state.exhausted {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => {
                    tracing::debug!("Fragment stream cancelled while reading");
                    return None;
                }
                chunk = state.body.next() => chunk,
            };

            match next {
                Some(Ok(bytes)) => {
                    tracing::trace!("Read {} bytes", bytes.len());
                    let decoded = state.decoder.push(&bytes);
                    state.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.exhausted = true;
                    let decoded = state.decoder.finish();
                    state.pending.extend(decoded);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(chunks: Vec<Result<Bytes>>) -> ByteStream {
        Box::pin(stream::iter(chunks))
    }

    fn record(content: &str) -> Bytes {
        Bytes::from(format!(
            "data: {{\"id\":\"c1\",\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
            content
        ))
    }

    #[tokio::test]
    async fn test_yields_fragments_in_order() {
        let chunks = vec![
            Ok(record("a")),
            Ok(record("b")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let tokens: Vec<String> = fragments(body(chunks), CancellationToken::new())
            .map(|f| f.unwrap().token)
            .collect()
            .await;
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_error_is_last_item() {
        let chunks = vec![
            Ok(record("a")),
            Err(anyhow::anyhow!("connection reset")),
            Ok(record("never")),
        ];
        let items: Vec<_> = fragments(body(chunks), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_cancel_ends_sequence_early() {
        let cancel = CancellationToken::new();
        let chunks = vec![Ok(record("a")), Ok(record("b")), Ok(record("c"))];
        let mut stream = Box::pin(fragments(body(chunks), cancel.clone()));

        assert_eq!(stream.next().await.unwrap().unwrap().token, "a");
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_body_observes_cancel() {
        let cancel = CancellationToken::new();
        let stalled: ByteStream = Box::pin(stream::pending());
        let mut stream = Box::pin(fragments(stalled, cancel.clone()));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(stream.next().await.is_none());
    }
}
