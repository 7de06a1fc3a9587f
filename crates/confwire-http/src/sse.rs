//! Incremental Server-Sent Events parser.
//!
//! Only the `data` field matters here: each event's data lines are joined
//! with newlines and handed out when the terminating blank line arrives.
//! `event`, `id` and `retry` fields and `:` comments are skipped.

/// Accumulates body chunks and yields complete event payloads.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body.
    ///
    /// Returns the payload of every event completed by this chunk, in order.
    /// Incomplete lines and events are kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Whether an event is partially accumulated.
    pub fn has_pending(&self) -> bool {
        !self.data_lines.is_empty() || !self.buffer.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<Vec<u8>> {
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
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<Vec<u8>> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        if payload.is_empty() {
            None
        } else {
            Some(payload.into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &str) -> Vec<String> {
        let mut parser = SseParser::new();
        parser
            .push(input.as_bytes())
            .into_iter()
            .map(|e| String::from_utf8(e).unwrap())
            .collect()
    }

    #[test]
    fn test_single_event() {
        assert_eq!(parse_all("data: {\"a\":1}\n\n"), vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_multiline_data_joined_with_newlines() {
        assert_eq!(
            parse_all("data: first\ndata:second\ndata:  indented\n\n"),
            vec!["first\nsecond\n indented"]
        );
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let input = ": keepalive\nevent: update\nid: 7\nretry: 1000\ndata: payload\n\n: ping\n\n";
        assert_eq!(parse_all(input), vec!["payload"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        assert_eq!(parse_all("data: one\r\n\r\ndata: two\r\n\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn test_chunks_split_anywhere() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"da").is_empty());
        assert!(parser.push(b"ta: hel").is_empty());
        assert!(parser.push(b"lo\r").is_empty());
        assert!(parser.push(b"\n").is_empty());
        assert!(parser.has_pending());
        assert_eq!(parser.push(b"\n"), vec![b"hello".to_vec()]);
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_incomplete_event_not_dispatched() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: partial\n").is_empty());
        assert!(parser.has_pending());
    }

    #[test]
    fn test_empty_data_not_dispatched() {
        assert!(parse_all("data:\n\n\n\n").is_empty());
    }
}
