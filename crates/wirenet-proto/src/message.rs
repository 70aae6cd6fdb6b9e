//! Protocol messages.
//!
//! One [`Message`] corresponds to one line on the wire, without its
//! terminating newline. Fields are separated by [`FIELD_SEPARATOR`]; the first
//! field is the keyword.

use crate::{error::ProtocolError, state::State};

/// Separator between fields of a line.
pub const FIELD_SEPARATOR: char = ':';

/// Message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// `clientname`
    ClientName,
    /// `registration`
    Registration,
    /// `statechange`
    StateChange,
}

impl Keyword {
    /// Wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientName => "clientname",
            Self::Registration => "registration",
            Self::StateChange => "statechange",
        }
    }

    fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "clientname" => Some(Self::ClientName),
            "registration" => Some(Self::Registration),
            "statechange" => Some(Self::StateChange),
            _ => None,
        }
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Declares the connection's group label. Sent once, right after connect.
    ClientName {
        /// Group label.
        name: String,
    },

    /// Declares the full set of terminals owned by the connection.
    Registration {
        /// Terminal names, in the order the client enumerates them.
        terminals: Vec<String>,
    },

    /// A terminal changed state. Travels in both directions.
    StateChange {
        /// Terminal the state belongs to.
        terminal: String,
        /// New state.
        state: State,
    },
}

impl Message {
    /// Shorthand for a [`Message::StateChange`].
    pub fn state_change(terminal: impl Into<String>, state: State) -> Self {
        Self::StateChange { terminal: terminal.into(), state }
    }

    /// Keyword of this message.
    pub const fn keyword(&self) -> Keyword {
        match self {
            Self::ClientName { .. } => Keyword::ClientName,
            Self::Registration { .. } => Keyword::Registration,
            Self::StateChange { .. } => Keyword::StateChange,
        }
    }

    /// Decode one line (without its terminator).
    ///
    /// # Errors
    ///
    /// - `MissingSeparator` if the line has no `:`
    /// - `UnknownKeyword` if the keyword is not recognized
    /// - `FieldCount` / `EmptyField` if the fields do not fit the keyword
    /// - `ReservedCharacter` if a field holds a stray `\r`
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let Some((keyword, rest)) = line.split_once(FIELD_SEPARATOR) else {
            return Err(ProtocolError::MissingSeparator { line: line.to_string() });
        };

        let keyword = Keyword::parse(keyword)
            .ok_or_else(|| ProtocolError::UnknownKeyword { keyword: keyword.to_string() })?;
        let fields: Vec<&str> = rest.split(FIELD_SEPARATOR).collect();

        for field in &fields {
            check_field(keyword, field)?;
        }

        match keyword {
            Keyword::ClientName => {
                expect_fields(keyword, &fields, 1)?;
                Ok(Self::ClientName { name: fields[0].to_string() })
            },
            Keyword::Registration => Ok(Self::Registration {
                terminals: fields.into_iter().map(str::to_string).collect(),
            }),
            Keyword::StateChange => {
                expect_fields(keyword, &fields, 2)?;
                Ok(Self::StateChange {
                    terminal: fields[0].to_string(),
                    state: State::from_token(fields[1]),
                })
            },
        }
    }

    /// Append the encoded line, including its newline, to `dst`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyField` or `ReservedCharacter` if a field cannot be
    /// represented on the wire. Nothing is written in that case.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let keyword = self.keyword();
        let fields: Vec<&str> = match self {
            Self::ClientName { name } => vec![name.as_str()],
            Self::Registration { terminals } => terminals.iter().map(String::as_str).collect(),
            Self::StateChange { terminal, state } => vec![terminal.as_str(), state.token()],
        };

        if fields.is_empty() {
            return Err(ProtocolError::EmptyField { keyword: keyword.as_str() });
        }
        for field in &fields {
            check_field(keyword, field)?;
        }

        dst.extend_from_slice(keyword.as_str().as_bytes());
        for field in fields {
            dst.push(FIELD_SEPARATOR as u8);
            dst.extend_from_slice(field.as_bytes());
        }
        dst.push(b'\n');

        Ok(())
    }
}

fn expect_fields(keyword: Keyword, fields: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::FieldCount { keyword: keyword.as_str(), expected, actual: fields.len() })
    }
}

fn check_field(keyword: Keyword, field: &str) -> Result<(), ProtocolError> {
    if field.is_empty() {
        return Err(ProtocolError::EmptyField { keyword: keyword.as_str() });
    }
    if field.contains([FIELD_SEPARATOR, '\n', '\r']) {
        return Err(ProtocolError::ReservedCharacter { field: field.to_string() });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::voltage;

    fn encoded(message: &Message) -> String {
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn decode_client_name() {
        let message = Message::decode("clientname:relays").unwrap();
        assert_eq!(message, Message::ClientName { name: "relays".to_string() });
    }

    #[test]
    fn decode_registration_keeps_order() {
        let message = Message::decode("registration:K1.A1:K1.A2:K1.11:K1.14").unwrap();
        assert_eq!(
            message,
            Message::Registration {
                terminals: vec![
                    "K1.A1".to_string(),
                    "K1.A2".to_string(),
                    "K1.11".to_string(),
                    "K1.14".to_string()
                ]
            }
        );
    }

    #[test]
    fn decode_state_change() {
        let message = Message::decode("statechange:Q1.1:230VAC").unwrap();
        assert_eq!(message, Message::state_change("Q1.1", State::from(voltage::AC_ON)));

        let message = Message::decode("statechange:Q1.1:None").unwrap();
        assert_eq!(message, Message::state_change("Q1.1", State::NoState));
    }

    #[test]
    fn decode_rejects_unknown_keyword() {
        let result = Message::decode("hello:world");
        assert!(matches!(result, Err(ProtocolError::UnknownKeyword { .. })));
    }

    #[test]
    fn decode_rejects_missing_separator() {
        let result = Message::decode("statechange");
        assert!(matches!(result, Err(ProtocolError::MissingSeparator { .. })));
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let result = Message::decode("statechange:Q1.1");
        assert_eq!(
            result,
            Err(ProtocolError::FieldCount { keyword: "statechange", expected: 2, actual: 1 })
        );

        let result = Message::decode("statechange:Q1.1:230VAC:extra");
        assert!(matches!(result, Err(ProtocolError::FieldCount { actual: 3, .. })));

        let result = Message::decode("clientname:a:b");
        assert!(matches!(result, Err(ProtocolError::FieldCount { keyword: "clientname", .. })));
    }

    #[test]
    fn decode_rejects_empty_fields() {
        assert!(matches!(Message::decode("registration:"), Err(ProtocolError::EmptyField { .. })));
        assert!(matches!(
            Message::decode("registration:A::B"),
            Err(ProtocolError::EmptyField { .. })
        ));
    }

    #[test]
    fn encode_state_change() {
        let message = Message::state_change("K1.14", State::NoState);
        assert_eq!(encoded(&message), "statechange:K1.14:None\n");
    }

    #[test]
    fn encode_registration() {
        let message =
            Message::Registration { terminals: vec!["X1".to_string(), "X2".to_string()] };
        assert_eq!(encoded(&message), "registration:X1:X2\n");
    }

    #[test]
    fn encode_rejects_reserved_characters() {
        let mut buf = Vec::new();
        let message = Message::ClientName { name: "a:b".to_string() };
        assert!(matches!(message.encode(&mut buf), Err(ProtocolError::ReservedCharacter { .. })));

        let message = Message::state_change("T1", State::Level("12\nVDC".to_string()));
        assert!(matches!(message.encode(&mut buf), Err(ProtocolError::ReservedCharacter { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_rejects_empty_registration() {
        let mut buf = Vec::new();
        let message = Message::Registration { terminals: vec![] };
        assert!(matches!(message.encode(&mut buf), Err(ProtocolError::EmptyField { .. })));
    }

    #[test]
    fn encoded_line_decodes_to_same_message() {
        let message = Message::state_change("F1.2", State::from(voltage::DC_ON));
        let line = encoded(&message);
        assert_eq!(Message::decode(line.trim_end_matches('\n')).unwrap(), message);
    }

    #[test]
    fn decode_rejects_stray_carriage_return() {
        assert!(matches!(
            Message::decode("clientname:a\rb"),
            Err(ProtocolError::ReservedCharacter { .. })
        ));
    }
}
