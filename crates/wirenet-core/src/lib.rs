//! Wirenet core.
//!
//! Pieces shared by the router and the client runtime:
//!
//! - [`env`]: `Environment` trait decoupling logic from time and randomness,
//!   plus the production [`SystemEnv`]
//! - [`wiring`]: the static [`WiringTable`] and its text format

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod wiring;

pub use env::{Environment, SystemEnv};
pub use wiring::{LINK_ARROW, WiringError, WiringMode, WiringTable};
