//! Circuit breaker.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use wirenet_proto::State;

use crate::{
    engine::TerminalEngine,
    error::EngineError,
    reaction::{Device, TerminalReaction},
};

/// Passes the input state through to the output while closed.
///
/// When open the output is held at `None`. Deliveries on the output side are
/// mirrored back to the input only while closed.
#[derive(Debug)]
pub struct CircuitBreaker {
    input: String,
    output: String,
    closed: AtomicBool,
}

impl CircuitBreaker {
    /// Register both terminals on `engine` and attach the breaker behavior.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateTerminal` if either terminal exists, or
    /// `EngineError::InvalidDevice` if both names are the same.
    pub fn install(
        engine: &mut TerminalEngine,
        input: impl Into<String>,
        output: impl Into<String>,
        initially_closed: bool,
    ) -> Result<Arc<Self>, EngineError> {
        let breaker = Arc::new(Self {
            input: input.into(),
            output: output.into(),
            closed: AtomicBool::new(initially_closed),
        });

        super::validate_layout(engine, &breaker.terminals())?;
        engine.register(breaker.input.clone(), State::NoState, Some(breaker.clone()))?;
        engine.register(breaker.output.clone(), State::NoState, Some(breaker.clone()))?;

        Ok(breaker)
    }

    /// True while current flows.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the breaker and mirror the input onto the output.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn close(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Breaker {} -> {} closed", self.input, self.output);
        self.sync_output(engine)
    }

    /// Open the breaker and release the output.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub fn open(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        self.closed.store(false, Ordering::Release);
        tracing::info!("Breaker {} -> {} opened", self.input, self.output);
        self.sync_output(engine)
    }

    fn sync_output(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        let state =
            if self.is_closed() { engine.get_state(&self.input)?.clone() } else { State::NoState };
        engine.apply_local_change(&self.output, state)
    }
}

impl TerminalReaction for CircuitBreaker {
    fn on_state_change(
        &self,
        engine: &mut TerminalEngine,
        terminal: &str,
        state: &State,
    ) -> Result<(), EngineError> {
        if terminal == self.input {
            return self.sync_output(engine);
        }

        // Output side: backfeed only through a closed breaker.
        if self.is_closed() {
            engine.apply_local_change(&self.input, state.clone())?;
        }
        Ok(())
    }
}

impl Device for CircuitBreaker {
    fn terminals(&self) -> Vec<&str> {
        vec![self.input.as_str(), self.output.as_str()]
    }
}
