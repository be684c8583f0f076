//! Brace-delimited JSON framing
//!
//! Messages on both connections are bare JSON objects with no length prefix
//! and no required separator. A frame ends at the `}` that closes the
//! top-level object; braces inside string literals (including escaped
//! quotes) do not count. Bytes between objects, such as the newline an
//! interactive client sends after each request, are skipped.

use thiserror::Error;

/// Upper bound on a single frame; a peer that exceeds it loses the partial frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Incremental splitter turning a byte stream into complete JSON object texts.
///
/// Feed it whatever the socket produced with [`FrameDecoder::extend`] and
/// drain frames with [`FrameDecoder::next_frame`] until it returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    start: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            start: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            limit,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        while self.scanned < self.buffer.len() {
            let byte = self.buffer[self.scanned];
            self.scanned += 1;

            if self.depth == 0 {
                if byte == b'{' {
                    self.depth = 1;
                    self.start = self.scanned - 1;
                }
                continue;
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return self.take_frame();
                    }
                }
                _ => {}
            }
        }

        if self.depth == 0 {
            // Only inter-frame noise left.
            self.buffer.clear();
            self.scanned = 0;
            self.start = 0;
            return Ok(None);
        }

        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }

        if self.buffer.len() > self.limit {
            self.reset();
            return Err(FrameError::TooLarge { limit: self.limit });
        }

        Ok(None)
    }

    fn take_frame(&mut self) -> Result<Option<String>, FrameError> {
        let end = self.scanned;
        let start = self.start;
        let frame: Vec<u8> = self.buffer.drain(..end).skip(start).collect();
        self.scanned = 0;
        self.start = 0;

        if frame.len() > self.limit {
            return Err(FrameError::TooLarge { limit: self.limit });
        }

        String::from_utf8(frame)
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.start = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn drain(decoder: &mut FrameDecoder) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = assert_ok!(decoder.next_frame()) {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_back_to_back_objects_without_separator() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"status":200}{"message":"gamestarted"}"#);

        assert_eq!(
            drain(&mut decoder),
            vec![
                r#"{"status":200}"#.to_string(),
                r#"{"message":"gamestarted"}"#.to_string()
            ]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"method": "saveanswer", "ans"#);
        assert_eq!(assert_ok!(decoder.next_frame()), None);

        decoder.extend(br#"wer": "x", "token": "t"}"#);
        assert_eq!(
            assert_ok!(decoder.next_frame()),
            Some(r#"{"method": "saveanswer", "answer": "x", "token": "t"}"#.to_string())
        );
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"answer": "a } and a { and a \" quote }"}"#);
        decoder.extend(b"\n");

        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["answer"], "a } and a { and a \" quote }");
    }

    #[test]
    fn test_nested_objects_end_at_outer_brace() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(br#"{"points": {"ann": 10, "bob": 20}, "status": 200}"#);
        let frames = drain(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].ends_with("200}"));
    }

    #[test]
    fn test_noise_between_frames_is_skipped() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\r\n  garbage {\"a\":1}\n\n{\"b\":2}\n");
        assert_eq!(
            drain(&mut decoder),
            vec![r#"{"a":1}"#.to_string(), r#"{"b":2}"#.to_string()]
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_oversized_frame_is_discarded() {
        let mut decoder = FrameDecoder::with_limit(16);
        decoder.extend(br#"{"answer": "this never ends"#);
        assert_eq!(
            assert_err!(decoder.next_frame()),
            FrameError::TooLarge { limit: 16 }
        );
        assert_eq!(decoder.pending(), 0);

        decoder.extend(br#"{"ok":1}"#);
        assert_eq!(
            assert_ok!(decoder.next_frame()),
            Some(r#"{"ok":1}"#.to_string())
        );
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"a\":\"\xff\"}");
        assert_eq!(assert_err!(decoder.next_frame()), FrameError::InvalidUtf8);
        assert_eq!(assert_ok!(decoder.next_frame()), None);
    }
}
