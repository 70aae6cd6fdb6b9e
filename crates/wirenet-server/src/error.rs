//! Server error types.

use std::fmt;

use wirenet_core::WiringError;
use wirenet_proto::ProtocolError;

use crate::router::RouterError;

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// Protocol error
    Protocol(ProtocolError),

    /// Router error
    Router(RouterError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Router(err) => write!(f, "router error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Router(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RouterError> for ServerError {
    fn from(err: RouterError) -> Self {
        Self::Router(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<WiringError> for ServerError {
    fn from(err: WiringError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_category() {
        let err = ServerError::from(RouterError::UnregisteredTerminal { terminal: "T9".to_string() });
        assert_eq!(err.to_string(), "router error: terminal not registered: T9");

        let err = ServerError::from(std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "transport error: boom");
    }

    #[test]
    fn protocol_error_has_source() {
        let err = ServerError::from(ProtocolError::InvalidUtf8);
        assert!(std::error::Error::source(&err).is_some());
    }
}
