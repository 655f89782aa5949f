//! Incremental parser for the server's `text/event-stream` of changes.

use tracing::warn;

use crate::propagation::ChangeEvent;

/// SSE event name used for store changes.
pub const CHANGE_EVENT_NAME: &str = "prompts-changed";

/// Buffers incoming byte chunks, splits them into lines and yields one
/// [`ChangeEvent`] per complete `prompts-changed` event:
///
/// ```text
/// event: prompts-changed
/// data: {"kind":{"store":"catalog","catalog":"custom"},"revision":4,"origin":"local"}
///
/// ```
///
/// Comments (`:` lines, used for keep-alives), other event names and
/// undecodable payloads are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: String,
}

impl SseParser {
    /// Feed a chunk; returns the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChangeEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else {
                self.field(line);
            }
        }
        events
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            // id:, retry: and unknown fields
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<ChangeEvent> {
        let name = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }
        if name.as_deref().is_some_and(|n| n != CHANGE_EVENT_NAME) {
            return None;
        }
        match serde_json::from_str(&data) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, data = %data, "undecodable change event");
                None
            }
        }
    }
}
