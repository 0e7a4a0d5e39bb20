//! CRLF line framing for the IRC wire.
//!
//! Wire format: `<line>\r\n`. Bare `\n` terminators are accepted on input.

use crate::error::{RelayError, RelayResult};
use crate::message::Message;

/// Longest accepted line, excluding the terminator (IRCv3 tags included).
pub const MAX_LINE_LEN: usize = 8191;

/// Encode a message into a CRLF-terminated line.
pub fn line_encode(msg: &Message) -> RelayResult<Vec<u8>> {
    let line = msg.as_str();
    if line.contains(['\r', '\n']) {
        return Err(RelayError::InvalidMessage(
            "line contains an embedded CR or LF".into(),
        ));
    }
    if line.len() > MAX_LINE_LEN {
        return Err(RelayError::InvalidMessage(format!(
            "line too long: {} bytes (max {MAX_LINE_LEN})",
            line.len()
        )));
    }

    let mut frame = Vec::with_capacity(line.len() + 2);
    frame.extend_from_slice(line.as_bytes());
    frame.extend_from_slice(b"\r\n");
    Ok(frame)
}

/// Streaming line decoder: accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append raw bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete line, if one is buffered.
    ///
    /// Empty lines are skipped. Invalid UTF-8 is replaced rather than
    /// rejected, since servers relay whatever encoding their users send.
    pub fn next_line(&mut self) -> RelayResult<Option<Message>> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LEN + 1 {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Err(RelayError::Codec(format!(
                        "unterminated line exceeds {MAX_LINE_LEN} bytes ({len} buffered)"
                    )));
                }
                return Ok(None);
            };

            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Err(RelayError::Codec(format!(
                    "line too long: {} bytes (max {MAX_LINE_LEN})",
                    line.len()
                )));
            }

            return Ok(Some(Message::new(String::from_utf8_lossy(&line))));
        }
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
