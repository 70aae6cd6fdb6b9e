//! Terminal reactions.

use wirenet_proto::State;

use crate::{engine::TerminalEngine, error::EngineError};

/// Behavior attached to a terminal.
///
/// The engine invokes the reaction every time a routed state change arrives
/// for the terminal, whether or not the value changed. The reaction receives
/// the engine so it can originate local changes on other terminals; those
/// changes are queued for the connection and never re-enter a reaction
/// synchronously.
pub trait TerminalReaction: Send + Sync {
    /// Called after the engine stored `state` on `terminal`.
    ///
    /// # Errors
    ///
    /// Fatal errors (see [`EngineError::is_fatal`]) halt the device.
    fn on_state_change(
        &self,
        engine: &mut TerminalEngine,
        terminal: &str,
        state: &State,
    ) -> Result<(), EngineError>;
}

/// A composite of terminals and reactions.
///
/// Devices install themselves on an engine (registering their terminals and
/// attaching reactions) and get a chance to assert their outputs every time
/// the connection is (re-)established.
pub trait Device: Send + Sync {
    /// Terminal names this device owns.
    fn terminals(&self) -> Vec<&str>;

    /// Called after the engine announced itself to the server.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    fn on_connected(&self, _engine: &mut TerminalEngine) -> Result<(), EngineError> {
        Ok(())
    }
}
