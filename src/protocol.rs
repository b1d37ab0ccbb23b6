//! Message framing for the telemetry text protocol.
//!
//! Requests and responses are arbitrary text terminated by a single
//! delimiter byte. The framer buffers raw bytes from the socket and hands
//! out complete messages with the delimiter stripped:
//!
//! ```text
//! Request:  ECHO<delim>
//! Response: ECHO\n!<delim>
//! ```
//!
//! Bytes that never see a delimiter stay buffered; there is no maximum
//! frame size.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Initial capacity of a framer's read buffer
pub const BUFFER_SIZE: usize = 16 * 1024;

/// Fixed suffix appended to every response before the delimiter.
pub const RESPONSE_SUFFIX: &str = "!";

/// Result of parsing a single message
#[derive(Debug, PartialEq)]
pub enum ParseResult {
    /// A complete message and the number of bytes it consumed,
    /// including the delimiter.
    Complete(String, usize),
    /// No delimiter in the input yet.
    Incomplete,
}

/// Parse one message from the front of `input`.
pub fn parse(input: &[u8], delimiter: u8) -> ParseResult {
    match input.iter().position(|&b| b == delimiter) {
        Some(end) => {
            let text = String::from_utf8_lossy(&input[..end]).into_owned();
            ParseResult::Complete(text, end + 1)
        }
        None => ParseResult::Incomplete,
    }
}

/// Serialize a message: text followed by the delimiter.
pub fn serialize(text: &str, delimiter: u8) -> Bytes {
    let mut out = BytesMut::with_capacity(text.len() + 1);
    out.put_slice(text.as_bytes());
    out.put_u8(delimiter);
    out.freeze()
}

/// Build the wire form of a handler response: text, suffix, delimiter.
pub fn response(text: &str, delimiter: u8) -> Bytes {
    let mut out = BytesMut::with_capacity(text.len() + RESPONSE_SUFFIX.len() + 1);
    out.put_slice(text.as_bytes());
    out.put_slice(RESPONSE_SUFFIX.as_bytes());
    out.put_u8(delimiter);
    out.freeze()
}

/// Strip the response suffix for display. Text without it is returned as is.
pub fn strip_suffix(text: &str) -> &str {
    text.strip_suffix(RESPONSE_SUFFIX).unwrap_or(text)
}

/// Incremental framer owning the partial-frame buffer of one connection.
#[derive(Debug)]
pub struct Framer {
    delimiter: u8,
    buffer: BytesMut,
}

impl Framer {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Append raw bytes and iterate over the messages they complete.
    ///
    /// The iterator is lazy: messages left unconsumed when it is dropped
    /// stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Messages<'_> {
        self.buffer.extend_from_slice(data);
        Messages { framer: self }
    }

    /// Buffer to read socket data into directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Pop the next complete message, if any.
    pub fn next_message(&mut self) -> Option<String> {
        match parse(&self.buffer, self.delimiter) {
            ParseResult::Complete(text, consumed) => {
                self.buffer.advance(consumed);
                Some(text)
            }
            ParseResult::Incomplete => None,
        }
    }

    /// Bytes buffered without a terminating delimiter yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn serialize(&self, text: &str) -> Bytes {
        serialize(text, self.delimiter)
    }
}

/// Lazy sequence of complete messages drained from a [`Framer`].
pub struct Messages<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete() {
        assert_eq!(
            parse(b"ECHO\0rest", 0),
            ParseResult::Complete("ECHO".to_string(), 5)
        );
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(parse(b"ECHO", 0), ParseResult::Incomplete);
        assert_eq!(parse(b"", 0), ParseResult::Incomplete);
    }

    #[test]
    fn test_round_trip() {
        for m in ["", "ECHO", "CD /tmp", "multi\nline\ntext", "Humidity: 50 %"] {
            let wire = serialize(m, 0);
            assert_eq!(parse(&wire, 0), ParseResult::Complete(m.to_string(), wire.len()));
        }
    }

    #[test]
    fn test_feed_yields_all_complete_messages() {
        let mut framer = Framer::new(b'%');
        let messages: Vec<_> = framer.feed(b"ECHO%INFO%QU").collect();
        assert_eq!(messages, vec!["ECHO", "INFO"]);
        assert_eq!(framer.pending(), 2);

        let messages: Vec<_> = framer.feed(b"IT%").collect();
        assert_eq!(messages, vec!["QUIT"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_empty_message_between_delimiters() {
        let mut framer = Framer::new(0);
        let messages: Vec<_> = framer.feed(b"\0\0").collect();
        assert_eq!(messages, vec!["", ""]);
    }

    #[test]
    fn test_unconsumed_messages_stay_buffered() {
        let mut framer = Framer::new(0);
        let first = framer.feed(b"A\0B\0").next();
        assert_eq!(first.as_deref(), Some("A"));
        assert_eq!(framer.next_message().as_deref(), Some("B"));
        assert_eq!(framer.next_message(), None);
    }

    #[test]
    fn test_no_delimiter_keeps_bytes() {
        let mut framer = Framer::new(0);
        assert_eq!(framer.feed(&[b'x'; 100_000]).count(), 0);
        assert_eq!(framer.pending(), 100_000);
    }

    #[test]
    fn test_response_framing() {
        assert_eq!(&response("ECHO\n", 0)[..], b"ECHO\n!\0");
        assert_eq!(strip_suffix("ECHO\n!"), "ECHO\n");
        assert_eq!(strip_suffix("no suffix"), "no suffix");
    }
}
