//! Server-Sent Events decoding for upstream streams
//!
//! Upstream bodies arrive in arbitrary byte chunks. Events and UTF-8
//! sequences may both be split across chunk boundaries, so the decoder keeps
//! a text buffer plus any trailing partial code point between calls.

/// A decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
}

impl SseEvent {
    /// OpenAI-style end-of-stream marker
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    partial_utf8: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut bytes = std::mem::take(&mut self.partial_utf8);
        bytes.extend_from_slice(chunk);

        let (text, rest) = split_utf8(&bytes);
        self.partial_utf8 = rest;
        self.buffer.push_str(&text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Drain whatever is left once the body has ended
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.partial_utf8.is_empty() {
            let rest = std::mem::take(&mut self.partial_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block)
    }
}

/// Split bytes into the longest valid UTF-8 prefix and an incomplete tail.
/// Invalid sequences in the middle are replaced rather than kept.
fn split_utf8(bytes: &[u8]) -> (String, Vec<u8>) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), Vec::new()),
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            (
                String::from_utf8_lossy(&bytes[..valid]).into_owned(),
                bytes[valid..].to_vec(),
            )
        }
        Err(_) => {
            tracing::warn!("Invalid UTF-8 in upstream stream, replacing bytes");
            (String::from_utf8_lossy(bytes).into_owned(), Vec::new())
        }
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent { event, data: data_lines.join("\n") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        let events = decoder.feed(b"1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "data: héllo\n\n".as_bytes();
        // split inside the two-byte 'é'
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&text[..split]).is_empty());
        let events = decoder.feed(&text[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn test_crlf_comments_and_event_names() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\r\n\r\nevent: ping\r\ndata: {}\r\n\r");
        assert!(events.is_empty());
        let events = decoder.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_flush_returns_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.flush().map(|e| e.data), Some("tail".to_string()));
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }
}
