//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol lines.
///
/// Every decoding error is fatal to the connection that produced it: a peer
/// sending garbage is not resynchronized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Line keyword is not one of the known message kinds.
    #[error("unknown keyword: {keyword:?}")]
    UnknownKeyword {
        /// Keyword as received.
        keyword: String,
    },

    /// Non-blank line without a single field separator.
    #[error("missing field separator in line {line:?}")]
    MissingSeparator {
        /// Offending line.
        line: String,
    },

    /// Message carries the wrong number of fields.
    #[error("{keyword} expects {expected} field(s), got {actual}")]
    FieldCount {
        /// Message keyword.
        keyword: &'static str,
        /// Number of fields the keyword takes.
        expected: usize,
        /// Number of fields received.
        actual: usize,
    },

    /// A field is empty.
    #[error("{keyword} carries an empty field")]
    EmptyField {
        /// Message keyword.
        keyword: &'static str,
    },

    /// A field contains a separator or line terminator and cannot be encoded.
    #[error("field {field:?} contains a reserved character")]
    ReservedCharacter {
        /// Offending field.
        field: String,
    },

    /// Line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// Buffered data exceeds the maximum line length without a terminator.
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// Configured limit in bytes.
        limit: usize,
    },
}
