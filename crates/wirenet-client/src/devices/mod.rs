//! Reference device models.
//!
//! Every device registers its terminals on a [`TerminalEngine`] and attaches
//! itself as the reaction of the terminals it listens on. Devices hold no
//! reference to the engine; it is passed into every callback.

mod breaker;
mod load;
mod relay;
mod source;

pub use breaker::CircuitBreaker;
pub use load::Load;
pub use relay::{Relay, Supply};
pub use source::Source;

use crate::{engine::TerminalEngine, error::EngineError};

/// Check a device layout before registering anything.
///
/// A device either registers all of its terminals or none of them.
fn validate_layout(engine: &TerminalEngine, names: &[&str]) -> Result<(), EngineError> {
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(EngineError::InvalidDevice {
                reason: format!("terminal {name} used twice in one device"),
            });
        }
        if engine.is_registered(name) {
            return Err(EngineError::DuplicateTerminal { name: (*name).to_string() });
        }
    }
    Ok(())
}
