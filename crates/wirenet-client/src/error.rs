//! Client error types.

use thiserror::Error;
use wirenet_proto::{Keyword, ProtocolError, State};

/// Errors from terminal engine and device operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Terminal name already registered on this engine.
    #[error("terminal already registered: {name}")]
    DuplicateTerminal {
        /// The duplicated name.
        name: String,
    },

    /// Terminal name not registered on this engine.
    #[error("unknown terminal: {name}")]
    UnknownTerminal {
        /// The name that was not found.
        name: String,
    },

    /// A source observed its own inverted state.
    #[error("short circuit on {terminal}: observed {state}")]
    ShortCircuit {
        /// Source terminal.
        terminal: String,
        /// State that was delivered.
        state: State,
    },

    /// Device was configured with an impossible layout.
    #[error("invalid device: {reason}")]
    InvalidDevice {
        /// What is wrong with the layout.
        reason: String,
    },

    /// Server sent a message kind clients never receive.
    #[error("unexpected {} message from server", keyword.as_str())]
    UnexpectedMessage {
        /// Keyword of the message.
        keyword: Keyword,
    },

    /// Wire protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl EngineError {
    /// Returns true if this error is fatal (the device must halt).
    ///
    /// A short circuit is an unrepresentable physical state and protocol
    /// violations mean the stream cannot be trusted. Lookups of unknown
    /// terminals are contained to the message that caused them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ShortCircuit { .. }
            | Self::InvalidDevice { .. }
            | Self::UnexpectedMessage { .. }
            | Self::Protocol(_) => true,

            Self::DuplicateTerminal { .. } | Self::UnknownTerminal { .. } => false,
        }
    }
}

/// Errors from the client runtime.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent bytes that do not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A device failed fatally.
    #[error("device halted: {0}")]
    Engine(#[from] EngineError),
}

impl ConnectionError {
    /// Returns true if the client must stop instead of reconnecting.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Protocol(_) => false,
            Self::Engine(e) => e.is_fatal(),
        }
    }
}
