//! Incremental decoder for `data:` event lines.
//!
//! Network chunks do not respect line boundaries (or UTF-8 boundaries), so raw
//! bytes are buffered until a `\n` arrives. Only `data:` lines carry payload;
//! `data: [DONE]` ends the stream and everything after it is ignored.

use tracing::debug;

use super::wire::StreamChunk;

/// Prefix of payload lines.
pub const DATA_PREFIX: &str = "data:";
/// Payload marking the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Decoded stream event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamEvent {
    /// Non-empty text delta.
    Delta(String),
    /// End-of-stream sentinel.
    Done,
}

/// Byte-level line decoder.
#[derive(Debug, Default)]
pub struct EventLineDecoder {
    pending: Vec<u8>,
    finished: bool,
}

impl EventLineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the end-of-stream sentinel was seen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one network chunk and return the events of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if self.accept(&line[..pos], &mut events) {
                break;
            }
        }
        events
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.finished && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.accept(&line, &mut events);
        }
        events
    }

    /// Decode one line into `events`; returns true once the stream is over.
    fn accept(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) -> bool {
        match decode_line(line) {
            Some(StreamEvent::Done) => {
                events.push(StreamEvent::Done);
                self.finished = true;
                self.pending.clear();
                true
            }
            Some(event) => {
                events.push(event);
                false
            }
            None => false,
        }
    }
}

fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(line);
    let payload = text.trim_end_matches('\r').strip_prefix(DATA_PREFIX)?.trim();

    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk.into_delta().map(StreamEvent::Delta),
        Err(err) => {
            debug!("Skipping unparsable stream line: {err}");
            None
        }
    }
}
