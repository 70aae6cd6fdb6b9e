//! Fixed-voltage source.

use std::sync::Arc;

use wirenet_proto::State;

use crate::{
    engine::TerminalEngine,
    error::EngineError,
    reaction::{Device, TerminalReaction},
};

/// Holds one terminal at a fixed voltage.
///
/// - Delivery of `None` (the far side let go): the fixed voltage is pushed
///   back out.
/// - Delivery of the inverted voltage: short circuit, fatal.
/// - Anything else is left alone.
#[derive(Debug)]
pub struct Source {
    terminal: String,
    fixed_state: State,
    inverted_state: State,
}

impl Source {
    /// Register `terminal` on `engine` and attach the source behavior.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateTerminal` if the terminal exists.
    pub fn install(
        engine: &mut TerminalEngine,
        terminal: impl Into<String>,
        fixed_state: State,
        inverted_state: State,
    ) -> Result<Arc<Self>, EngineError> {
        let source = Arc::new(Self { terminal: terminal.into(), fixed_state, inverted_state });
        engine.register(source.terminal.clone(), State::NoState, Some(source.clone()))?;
        Ok(source)
    }

    /// Terminal held by this source.
    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// Voltage the source drives.
    pub fn fixed_state(&self) -> &State {
        &self.fixed_state
    }

    /// Push the fixed voltage outward.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn initialize(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        engine.apply_local_change(&self.terminal, self.fixed_state.clone())
    }
}

impl TerminalReaction for Source {
    fn on_state_change(
        &self,
        engine: &mut TerminalEngine,
        terminal: &str,
        state: &State,
    ) -> Result<(), EngineError> {
        if state.is_none() {
            return engine.apply_local_change(terminal, self.fixed_state.clone());
        }

        if *state == self.inverted_state {
            tracing::error!("Short circuit on {}: {} against {}", terminal, state, self.fixed_state);
            return Err(EngineError::ShortCircuit {
                terminal: terminal.to_string(),
                state: state.clone(),
            });
        }

        Ok(())
    }
}

impl Device for Source {
    fn terminals(&self) -> Vec<&str> {
        vec![self.terminal.as_str()]
    }

    fn on_connected(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        self.initialize(engine)
    }
}
