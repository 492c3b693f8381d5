//! Incremental parser for the `text/event-stream` wire format.
//!
//! The reader pulls one line at a time from an [`AsyncBufRead`] source and
//! accumulates `id:`, `event:` and `data:` fields into a pending event.  A
//! blank line dispatches the pending event (if it carries any data) and
//! resets it.  Lines may arrive split across arbitrary network chunks; the
//! buffered source takes care of reassembling them.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::SseError;
use crate::types::{EventKind, SseEvent};

/// Line-oriented SSE parser over a buffered byte source.
pub struct LineReader<R> {
    source: R,
    line: String,
    id: String,
    kind: Option<EventKind>,
    data: String,
    exhausted: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            line: String::new(),
            id: String::new(),
            kind: None,
            data: String::new(),
            exhausted: false,
        }
    }

    /// True once the source hit EOF or failed.  No further events will be
    /// produced after that.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Read and classify a single line.
    ///
    /// Returns `Ok(Some(event))` when the line was the blank line closing
    /// an event with data, `Ok(None)` for every other line and at EOF.
    /// A read error or a malformed `event:` value marks the reader
    /// exhausted and is returned to the caller.
    pub async fn read_line(&mut self) -> Result<Option<SseEvent>, SseError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.line);
        line.clear();
        let read = self.source.read_line(&mut line).await;
        let result = match read {
            Ok(0) => {
                self.exhausted = true;
                if !self.data.is_empty() {
                    tracing::debug!(
                        pending_bytes = self.data.len(),
                        "stream ended inside an event, discarding it"
                    );
                }
                Ok(None)
            }
            Ok(_) => self.process_line(trim_line_ending(&line)),
            Err(e) => {
                self.exhausted = true;
                Err(SseError::Io(e))
            }
        };
        self.line = line;
        result
    }

    /// Keep reading lines until one event is dispatched or the source is
    /// exhausted (`Ok(None)`).
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, SseError> {
        while !self.exhausted {
            if let Some(event) = self.read_line().await? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Apply one already-split line (without its line terminator).
    pub fn process_line(&mut self, line: &str) -> Result<Option<SseEvent>, SseError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            // Comment / keep-alive.
            return Ok(None);
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => {
                self.id = value.to_string();
            }
            "event" => {
                if value.is_empty() {
                    self.kind = None;
                } else {
                    match value.parse::<EventKind>() {
                        Ok(kind) => self.kind = Some(kind),
                        Err(e) => {
                            self.exhausted = true;
                            return Err(e);
                        }
                    }
                }
            }
            other => {
                tracing::trace!(field = other, "ignoring SSE field");
            }
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let id = std::mem::take(&mut self.id);
        let kind = self.kind.take();
        let mut data = std::mem::take(&mut self.data);

        // Blocks with no data, or only empty `data:` lines, are dropped.
        if data.chars().all(|c| c == '\n') {
            return None;
        }
        if data.ends_with('\n') {
            data.pop();
        }
        Some(SseEvent { id, kind, data })
    }
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(input: &'static str) -> LineReader<&'static [u8]> {
        LineReader::new(input.as_bytes())
    }

    async fn collect(input: &'static str) -> Vec<SseEvent> {
        let mut r = reader(input);
        let mut events = Vec::new();
        while let Some(ev) = r.next_event().await.unwrap() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn single_complete_event() {
        let events = collect("id: 1\nevent: event\ndata: {\"hello\":\"world\"}\n\n").await;
        assert_eq!(
            events,
            vec![SseEvent {
                id: "1".into(),
                kind: Some(EventKind::Event),
                data: "{\"hello\":\"world\"}".into(),
            }]
        );
    }

    #[tokio::test]
    async fn multiple_events_in_arrival_order() {
        let events = collect("data: first\n\ndata: second\n\nevent: signal\ndata: third\n\n").await;
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["first", "second", "third"]);
        assert_eq!(events[2].kind, Some(EventKind::Signal));
    }

    #[tokio::test]
    async fn multi_line_data_is_newline_joined() {
        let events = collect("data: a\ndata: b\ndata:c\n\n").await;
        assert_eq!(events[0].data, "a\nb\nc");
    }

    #[tokio::test]
    async fn empty_data_blocks_are_not_emitted() {
        let events = collect("data:\n\nid: 5\n\ndata: \ndata:\n\n: comment\n\n").await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn state_resets_between_events() {
        let events = collect("id: 7\nevent: signal\ndata: x\n\ndata: y\n\n").await;
        assert_eq!(events[1].id, "");
        assert_eq!(events[1].kind, None);
    }

    #[tokio::test]
    async fn comments_and_unknown_fields_are_ignored() {
        let events = collect(": keep-alive\nretry: 5000\nfoo: bar\ndata: payload\n\n").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "payload");
    }

    #[tokio::test]
    async fn crlf_line_endings() {
        let events = collect("id: 9\r\ndata: windows\r\n\r\n").await;
        assert_eq!(events[0].id, "9");
        assert_eq!(events[0].data, "windows");
    }

    #[tokio::test]
    async fn only_one_leading_space_is_stripped() {
        let events = collect("data:   indented\n\n").await;
        assert_eq!(events[0].data, "  indented");
    }

    #[tokio::test]
    async fn bare_field_name_has_empty_value() {
        let events = collect("data\ndata: x\n\n").await;
        assert_eq!(events[0].data, "\nx");
    }

    #[tokio::test]
    async fn incomplete_trailing_event_is_dropped() {
        let mut r = reader("data: complete\n\ndata: partial");
        assert_eq!(r.next_event().await.unwrap().unwrap().data, "complete");
        assert!(r.next_event().await.unwrap().is_none());
        assert!(r.is_exhausted());
    }

    #[tokio::test]
    async fn unknown_event_type_is_terminal() {
        let mut r = reader("event: bogus\ndata: x\n\ndata: never\n\n");
        let err = r.next_event().await.unwrap_err();
        assert!(matches!(err, SseError::UnknownEventType(ref v) if v == "bogus"));
        assert!(r.is_exhausted());
        assert!(r.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_event_value_resets_type() {
        let events = collect("event: signal\nevent:\ndata: x\n\n").await;
        assert_eq!(events[0].kind, None);
    }

    #[test]
    fn process_line_dispatches_on_blank_line_only() {
        let mut r = reader("");
        assert!(r.process_line("data: one").unwrap().is_none());
        assert!(r.process_line("id: 3").unwrap().is_none());
        let ev = r.process_line("").unwrap().unwrap();
        assert_eq!(ev.id, "3");
        assert_eq!(ev.data, "one");
    }

    #[tokio::test]
    async fn long_lines_are_not_truncated() {
        let payload = "x".repeat(256 * 1024);
        let input = format!("data: {payload}\n\n");
        let mut r = LineReader::new(input.as_bytes());
        let ev = r.next_event().await.unwrap().unwrap();
        assert_eq!(ev.data.len(), payload.len());
    }
}
