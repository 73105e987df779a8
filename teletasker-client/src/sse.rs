//! Incremental `text/event-stream` decoder.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Turns arbitrary byte chunks into events.
///
/// Bytes are buffered until a full line is available, so chunks may split
/// lines and UTF-8 sequences anywhere. An event is dispatched on a blank line
/// and only if it carried at least one `data` field.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    last_event_id: Option<String>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Id of the last dispatched event that carried one.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if id.is_some() {
            self.last_event_id.clone_from(&id);
        }
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"event: ping\ndata: {}\n\nevent: update\nid: 7\ndata: {\"type\":\"new_tasks\",\"chat_id\":42}\n\n",
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "ping");
        assert_eq!(events[1].event, "update");
        assert_eq!(events[1].data, r#"{"type":"new_tasks","chat_id":42}"#);
        assert_eq!(events[1].id.as_deref(), Some("7"));
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn buffers_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: upd").is_empty());
        assert!(decoder.push(b"ate\r\ndata: {\"a\":").is_empty());
        assert!(decoder.push(b"1}\r\n").is_empty());

        let events = decoder.push(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "update");
        assert_eq!(events[0].data, r#"{"a":1}"#);
    }

    #[test]
    fn keeps_utf8_split_mid_character() {
        let payload = "data: 👥 team\n\n".as_bytes();
        let (head, tail) = payload.split_at(8);
        let mut decoder = SseDecoder::new();

        assert!(decoder.push(head).is_empty());
        let events = decoder.push(tail);

        assert_eq!(events[0].data, "👥 team");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\ndata: first\ndata:second\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn blank_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: ping\n\n").is_empty());
        // The name does not leak into the next event.
        let events = decoder.push(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }
}
