//! Incremental decoder for the backend's line-delimited JSON stdout protocol.
//!
//! The backend writes one JSON object per line, interleaved with free-form
//! diagnostic text. Stream reads arrive as arbitrary byte chunks that may
//! split a line anywhere, so the codec buffers the trailing partial line and
//! guarantees the decoded sequence is independent of how the stream was
//! chunked.

use serde_json::Value;

/// One classified line from the backend's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A complete JSON object, ready for normalization.
    Event(Value),
    /// Human-readable log output; not a protocol event.
    Diagnostic(String),
    /// Looked like JSON (leading `{`) but failed to parse. Never fatal.
    Malformed { text: String, error: String },
}

/// Stateful line decoder. Feed raw chunks, get complete lines back.
#[derive(Debug, Default)]
pub struct LineCodec {
    buf: Vec<u8>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a raw chunk and return every line completed by it.
    ///
    /// Blank lines are skipped. A trailing partial line is buffered until
    /// the next chunk (or [`LineCodec::finish`]) completes it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Line> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            if let Some(line) = classify(&self.buf[start..end]) {
                out.push(line);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        out
    }

    /// Flush the buffered partial line at end of stream, if any.
    pub fn finish(&mut self) -> Option<Line> {
        let rest = std::mem::take(&mut self.buf);
        classify(&rest)
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn classify(raw: &[u8]) -> Option<Line> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Only lines that announce themselves as JSON objects are protocol
    // candidates; everything else is backend log output.
    if !trimmed.starts_with('{') {
        return Some(Line::Diagnostic(trimmed.to_string()));
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Some(Line::Event(value)),
        Err(e) => Some(Line::Malformed {
            text: trimmed.to_string(),
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(lines: &[Line]) -> Vec<Value> {
        lines
            .iter()
            .filter_map(|l| match l {
                Line::Event(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn whole_lines_decode() {
        let mut codec = LineCodec::new();
        let lines = codec.feed(b"{\"status\":\"ready\"}\n{\"type\":\"no_match\"}\n");
        assert_eq!(
            events(&lines),
            vec![json!({"status": "ready"}), json!({"type": "no_match"})]
        );
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let stream = b"{\"status\":\"ready\"}\nsensor warming up\n{\"type\":\"ticket\",\"status\":\"approved\",\"data\":{\"run\":\"1-9\"}}\n";

        let mut whole = LineCodec::new();
        let expected = whole.feed(stream);

        // Replay the same stream one byte at a time.
        let mut bytewise = LineCodec::new();
        let mut got = Vec::new();
        for b in stream {
            got.extend(bytewise.feed(&[*b]));
        }
        assert_eq!(got, expected);

        // And in a few awkward mid-token splits.
        let mut split = LineCodec::new();
        let mut got2 = Vec::new();
        got2.extend(split.feed(&stream[..7]));
        got2.extend(split.feed(&stream[7..40]));
        got2.extend(split.feed(&stream[40..]));
        assert_eq!(got2, expected);
    }

    #[test]
    fn partial_line_is_held_until_completed() {
        let mut codec = LineCodec::new();
        assert!(codec.feed(b"{\"status\":\"proc").is_empty());
        assert!(codec.pending() > 0);
        let lines = codec.feed(b"essing_finger\"}\n");
        assert_eq!(events(&lines), vec![json!({"status": "processing_finger"})]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut codec = LineCodec::new();
        let lines = codec.feed(b"\n\n  \n{\"status\":\"ready\"}\n\n");
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn non_json_lines_are_diagnostics() {
        let mut codec = LineCodec::new();
        let lines = codec.feed(b"[SENSOR] init ok\n{\"status\":\"ready\"}\n");
        assert_eq!(lines[0], Line::Diagnostic("[SENSOR] init ok".to_string()));
        assert!(matches!(lines[1], Line::Event(_)));
    }

    #[test]
    fn malformed_json_is_reported_not_fatal() {
        let mut codec = LineCodec::new();
        let lines = codec.feed(b"{\"status\": oops}\n{\"status\":\"ready\"}\n");
        match &lines[0] {
            Line::Malformed { text, error } => {
                assert_eq!(text, "{\"status\": oops}");
                assert!(!error.is_empty());
            }
            other => panic!("expected malformed line, got {other:?}"),
        }
        // The valid line that follows is not dropped or misattributed.
        assert_eq!(lines[1], Line::Event(json!({"status": "ready"})));
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut codec = LineCodec::new();
        assert!(codec.feed(b"{\"status\":\"ready\"}").is_empty());
        assert_eq!(codec.finish(), Some(Line::Event(json!({"status": "ready"}))));
        assert_eq!(codec.finish(), None);
    }
}
