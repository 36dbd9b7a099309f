//! Newline-delimited JSON decoding for Ollama streaming responses.
//!
//! The server writes one JSON object per line, but network reads do not respect
//! line boundaries. `NdjsonDecoder` keeps the unterminated tail of the previous
//! read and only parses lines once their `\n` has arrived. Bytes are buffered
//! rather than text so a UTF-8 sequence split across two reads is rejoined
//! before decoding.

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct WireChunk {
    /// Fragment from `/api/generate`
    #[serde(default)]
    response: Option<String>,
    /// Fragment from `/api/chat`
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

/// One decoded event from the response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Fragment(String),
    Done,
    ServerError(String),
}

#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
    skipped: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read and return the items from every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        // Only the new bytes can contain a newline we have not seen yet
        let mut search_from = self.buf.len();
        self.buf.extend_from_slice(bytes);

        while let Some(offset) = self.buf[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            self.decode_line(&line[..line.len() - 1], &mut items);
            search_from = 0;
        }

        items
    }

    /// Flush a final line the server did not terminate with `\n`.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.decode_line(&rest, &mut items);
        }
        items
    }

    /// Number of lines dropped because they were not valid JSON.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8], items: &mut Vec<StreamItem>) {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                warn!("skipping stream line with invalid UTF-8: {}", e);
                self.skipped += 1;
                return;
            }
        };

        let line = text.trim();
        if line.is_empty() {
            return;
        }

        let chunk: WireChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("skipping malformed stream line: {} ({:?})", e, line);
                self.skipped += 1;
                return;
            }
        };

        if let Some(error) = chunk.error {
            items.push(StreamItem::ServerError(error));
            return;
        }

        let fragment = chunk
            .response
            .or_else(|| chunk.message.map(|m| m.content))
            .unwrap_or_default();
        if !fragment.is_empty() {
            items.push(StreamItem::Fragment(fragment));
        }

        if chunk.done {
            debug!("stream reported done");
            items.push(StreamItem::Done);
        }
    }
}

/// Concatenate the fragments of a decoded stream.
#[cfg(test)]
pub fn collect_text(items: &[StreamItem]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            StreamItem::Fragment(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
