//! Incremental Server-Sent-Events decoder.
//!
//! Upstreams chunk their `text/event-stream` bodies at arbitrary byte
//! boundaries; the parser buffers partial lines across [`SseParser::feed`]
//! calls so that any chunking of the same bytes yields the same events.

/// A parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Frame event name, when an `event:` line was present.
    pub event: Option<String>,
    /// Frame data; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Incremental parser for `text/event-stream` payloads.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current_event: Option<String>,
    current_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume raw chunk text and return the frames completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        self.buffer.push_str(chunk);

        while let Some(newline_idx) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=newline_idx).collect();
            line.pop(); // the '\n'
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                // Blank line terminates the current frame.
                if self.current_event.is_some() || !self.current_data.is_empty() {
                    events.push(SseEvent {
                        event: self.current_event.take(),
                        data: self.current_data.join("\n"),
                    });
                    self.current_data.clear();
                }
                continue;
            }

            if line.starts_with(':') {
                // Comment line.
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.current_event = Some(rest.trim_start().to_string());
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                self.current_data
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                continue;
            }

            // Not a field we understand; treat as data (defensive).
            self.current_data.push(line);
        }

        events
    }

    /// Flush any buffered frame at stream end.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.current_event.is_some() || !self.current_data.is_empty() {
            events.push(SseEvent {
                event: self.current_event.take(),
                data: self.current_data.join("\n"),
            });
            self.current_data.clear();
        }
        if !self.buffer.is_empty() {
            events.push(SseEvent {
                event: None,
                data: std::mem::take(&mut self.buffer),
            });
        }
        events
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
