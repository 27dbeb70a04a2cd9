//! Server-sent-event decoder for streamed chat completions
//!
//! Wire records look like `data: {json}` separated by newlines and end with
//! `data: [DONE]`. Network reads do not align with record boundaries, so
//! an incomplete trailing line is held back until the next read completes
//! it (or the body ends).

use serde::{Deserialize, Serialize};
use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// One decoded content delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Id of the record carrying the token, or the stream id when it has none
    pub id: String,
    /// Content delta
    pub token: String,
}

/// Incremental decoder over raw body bytes
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    stream_id: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream id captured so far
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Feed one network read, returning the fragments it completes
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::relay::SseDecoder;
    ///
    /// let mut decoder = SseDecoder::new();
    /// let fragments = decoder.push(
    ///     b"data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
    /// );
    /// assert_eq!(fragments.len(), 1);
    /// assert_eq!(fragments[0].token, "Hi");
    /// ```
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFragment> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        self.decode_lines(&complete)
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<StreamFragment> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_lines(&rest)
    }

    fn decode_lines(&mut self, bytes: &[u8]) -> Vec<StreamFragment> {
        let text = String::from_utf8_lossy(bytes);
        let mut fragments = Vec::new();

        for line in text.split('\n') {
            let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();
            if payload.is_empty() || payload == DONE_MARKER {
                continue;
            }

            let record: Value = match serde_json::from_str(payload) {
                Ok(record) => record,
                Err(e) => {
                    tracing::trace!("Dropping unparsable record: {}", e);
                    continue;
                }
            };

            let record_id = record.get("id").and_then(Value::as_str);
            if self.stream_id.is_none() {
                self.stream_id = record_id.map(str::to_string);
            }

            let content = record
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !content.is_empty() {
                // records without an id inherit the stream's
                let id = record_id
                    .map(str::to_string)
                    .or_else(|| self.stream_id.clone())
                    .unwrap_or_default();
                fragments.push(StreamFragment {
                    id,
                    token: content.to_string(),
                });
            }
        }

        fragments
    }
}
