//! Wirenet client.
//!
//! A client process owns a set of terminals and the devices built on them.
//!
//! ## Architecture
//!
//! ```text
//! wirenet-client
//!   ├─ TerminalEngine    (terminal states, local/remote change paths)
//!   ├─ TerminalReaction  (per-terminal behavior)
//!   ├─ devices           (Source, Load, CircuitBreaker, Relay)
//!   └─ ClientRuntime     (TCP session, reconnect loop)
//! ```
//!
//! The engine and devices perform no I/O; only [`ClientRuntime`] touches the
//! network.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
pub mod devices;
mod engine;
mod error;
mod reaction;

pub use connection::{ClientConfig, ClientHandle, ClientRuntime};
pub use engine::TerminalEngine;
pub use error::{ConnectionError, EngineError};
pub use reaction::{Device, TerminalReaction};
