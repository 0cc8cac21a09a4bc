//! Incremental server-sent-events parsing.

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; defaults to `message` per the SSE spec.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Push-based parser fed arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: String,
}

impl SseEventParser {
    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            let Some(boundary) = self.find_boundary() else {
                break;
            };
            let (block_len, skip) = boundary;
            let block: String = self.buffer.drain(..block_len).collect();
            self.buffer.drain(..skip);
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }

        events
    }

    /// Events end at a blank line: `\n\n` or `\r\n\r\n`.
    fn find_boundary(&self) -> Option<(usize, usize)> {
        let lf = self.buffer.find("\n\n");
        let crlf = self.buffer.find("\r\n\r\n");
        match (lf, crlf) {
            (Some(a), Some(b)) if b < a => Some((b, 4)),
            (Some(a), _) => Some((a, 2)),
            (None, Some(b)) => Some((b, 4)),
            (None, None) => None,
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments (`:`) and other fields (id, retry) are ignored.
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}
