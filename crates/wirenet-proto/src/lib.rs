//! Wirenet wire protocol.
//!
//! Terminals exchange state over a persistent byte stream using a
//! newline-terminated, colon-separated text format:
//!
//! ```text
//! clientname:<name>
//! registration:<term1>:<term2>:...
//! statechange:<terminal>:<state>
//! ```
//!
//! # Components
//!
//! - [`State`]: Opaque voltage-level token or the `None` sentinel
//! - [`Message`]: One protocol line, typed
//! - [`LineCodec`]: Reassembles lines from partial reads and encodes messages
//! - [`ProtocolError`]: Everything that can go wrong on the wire
//!
//! The protocol performs no validation of state tokens beyond exact string
//! equality.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod message;
mod state;

pub use codec::LineCodec;
pub use error::ProtocolError;
pub use message::{FIELD_SEPARATOR, Keyword, Message};
pub use state::{NO_STATE_TOKEN, State, voltage};
