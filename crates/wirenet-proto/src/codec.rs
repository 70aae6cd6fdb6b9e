//! Stream framing.
//!
//! TCP reads do not respect line boundaries. [`LineCodec`] accumulates bytes
//! in a [`BytesMut`] and yields complete messages as their terminating newline
//! arrives. A trailing `\r` is tolerated and blank lines are skipped.

use bytes::{Buf, BytesMut};

use crate::{error::ProtocolError, message::Message};

/// Newline-delimited message codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCodec {
    max_line_length: usize,
}

impl LineCodec {
    /// Default upper bound for a single line, terminator excluded.
    pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

    /// Codec with the default line limit.
    pub const fn new() -> Self {
        Self { max_line_length: Self::DEFAULT_MAX_LINE_LENGTH }
    }

    /// Codec with a custom line limit.
    pub const fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    /// Maximum accepted line length in bytes.
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Pull the next complete message out of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds no complete line yet; the partial
    /// line stays buffered for the next read.
    ///
    /// # Errors
    ///
    /// - `LineTooLong` if a line (complete or not) exceeds the limit
    /// - `InvalidUtf8` if the line is not UTF-8
    /// - Any decoding error from [`Message::decode`]
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        loop {
            let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_line_length {
                    return Err(ProtocolError::LineTooLong { limit: self.max_line_length });
                }
                return Ok(None);
            };

            if newline > self.max_line_length {
                return Err(ProtocolError::LineTooLong { limit: self.max_line_length });
            }

            let line = buf.split_to(newline);
            buf.advance(1);

            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            let text = text.strip_suffix('\r').unwrap_or(text);
            if text.trim().is_empty() {
                continue;
            }

            return Message::decode(text).map(Some);
        }
    }

    /// Append the encoded message to `dst`.
    ///
    /// # Errors
    ///
    /// See [`Message::encode`].
    pub fn encode(&self, message: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut line = Vec::new();
        message.encode(&mut line)?;
        dst.extend_from_slice(&line);
        Ok(())
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::state::State;

    #[test]
    fn partial_line_stays_buffered() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"statechange:Q1"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"statechange:Q1");

        buf.extend_from_slice(b".1:48VDC\n");
        let message = codec.decode(&mut buf).unwrap();
        assert_eq!(message, Some(Message::state_change("Q1.1", State::from("48VDC"))));
        assert!(buf.is_empty());
    }

    #[test]
    fn several_lines_in_one_read() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"clientname:loads\nregistration:L1:L2\nstatech"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::ClientName { name: "loads".to_string() })
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::Registration { terminals: vec!["L1".to_string(), "L2".to_string()] })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"statech");
    }

    #[test]
    fn blank_lines_and_crlf_tolerated() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\n  \nclientname:x\r\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::ClientName { name: "x".to_string() })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_line_is_an_error() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"reset:everything\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(ProtocolError::UnknownKeyword { .. })));
    }

    #[test]
    fn overlong_partial_line_rejected() {
        let codec = LineCodec::with_max_line_length(16);
        let mut buf = BytesMut::from(&[b'a'; 17][..]);
        assert_eq!(codec.decode(&mut buf), Err(ProtocolError::LineTooLong { limit: 16 }));
    }

    #[test]
    fn overlong_complete_line_rejected() {
        let codec = LineCodec::with_max_line_length(8);
        let mut buf = BytesMut::from(&b"statechange:A:B\n"[..]);
        assert_eq!(codec.decode(&mut buf), Err(ProtocolError::LineTooLong { limit: 8 }));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"clientname:\xff\xfe\n"[..]);
        assert_eq!(codec.decode(&mut buf), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn encode_appends_line() {
        let codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&Message::ClientName { name: "breakers".to_string() }, &mut buf).unwrap();
        codec.encode(&Message::state_change("F1.2", State::NoState), &mut buf).unwrap();
        assert_eq!(&buf[..], b"clientname:breakers\nstatechange:F1.2:None\n");
    }

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let codec = LineCodec::with_max_line_length(128);
            let mut buf = BytesMut::from(&data[..]);
            for _ in 0..64 {
                match codec.decode(&mut buf) {
                    Ok(Some(_)) => {},
                    Ok(None) | Err(_) => break,
                }
            }
        }

        #[test]
        fn split_point_does_not_matter(
            terminal in "[A-Za-z0-9._]{1,12}",
            token in "[A-Za-z0-9]{1,8}",
            split in 0usize..40,
        ) {
            let codec = LineCodec::new();
            let message = Message::state_change(terminal, State::from_token(&token));
            let mut encoded = BytesMut::new();
            codec.encode(&message, &mut encoded).unwrap();

            let split = split.min(encoded.len());
            let mut buf = BytesMut::from(&encoded[..split]);
            let first = codec.decode(&mut buf).unwrap();
            buf.extend_from_slice(&encoded[split..]);

            let decoded = match first {
                Some(decoded) => decoded,
                None => codec.decode(&mut buf).unwrap().unwrap(),
            };
            prop_assert_eq!(decoded, message);
        }
    }
}
