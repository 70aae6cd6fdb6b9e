//! Two-terminal load.

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

/// A sink between a power terminal and a zero-reference terminal.
///
/// The load is ON while the power terminal sits at the on voltage and the zero
/// terminal at the off voltage.
#[derive(Debug)]
pub struct Load {
    power_terminal: String,
    zero_terminal: String,
    on_state: State,
    off_state: State,
    on: AtomicBool,
}

impl Load {
    /// Register both terminals on `engine` and attach the load behavior.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DuplicateTerminal` if either terminal exists, or
    /// `EngineError::InvalidDevice` if both names are the same.
    pub fn install(
        engine: &mut TerminalEngine,
        power_terminal: impl Into<String>,
        zero_terminal: impl Into<String>,
        on_state: State,
        off_state: State,
    ) -> Result<Arc<Self>, EngineError> {
        let load = Arc::new(Self {
            power_terminal: power_terminal.into(),
            zero_terminal: zero_terminal.into(),
            on_state,
            off_state,
            on: AtomicBool::new(false),
        });

        super::validate_layout(engine, &load.terminals())?;
        engine.register(load.power_terminal.clone(), State::NoState, Some(load.clone()))?;
        engine.register(load.zero_terminal.clone(), State::NoState, Some(load.clone()))?;

        Ok(load)
    }

    /// True while the load is energized.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    /// Power-side terminal.
    pub fn power_terminal(&self) -> &str {
        &self.power_terminal
    }

    /// Zero-reference terminal.
    pub fn zero_terminal(&self) -> &str {
        &self.zero_terminal
    }

    fn set_on(&self, on: bool) {
        if self.on.swap(on, Ordering::AcqRel) != on {
            tracing::info!("Load {} is {}", self.power_terminal, if on { "ON" } else { "OFF" });
        }
    }

    fn power_changed(&self, engine: &mut TerminalEngine, state: &State) -> Result<(), EngineError> {
        if state.is_none() {
            self.set_on(false);
            return engine.apply_local_change(&self.zero_terminal, State::NoState);
        }

        if *state == self.on_state {
            engine.apply_local_change(&self.power_terminal, self.on_state.clone())?;
            if *engine.get_state(&self.zero_terminal)? == self.off_state {
                self.set_on(true);
            } else {
                engine.apply_local_change(&self.zero_terminal, State::NoState)?;
            }
            return Ok(());
        }

        self.set_on(false);
        Ok(())
    }

    fn zero_changed(&self, engine: &TerminalEngine, state: &State) -> Result<(), EngineError> {
        let powered = *engine.get_state(&self.power_terminal)? == self.on_state;
        self.set_on(powered && *state == self.off_state);
        Ok(())
    }
}

impl TerminalReaction for Load {
    fn on_state_change(
        &self,
        engine: &mut TerminalEngine,
        terminal: &str,
        state: &State,
    ) -> Result<(), EngineError> {
        if terminal == self.power_terminal {
            self.power_changed(engine, state)
        } else {
            self.zero_changed(engine, state)
        }
    }
}

impl Device for Load {
    fn terminals(&self) -> Vec<&str> {
        vec![self.power_terminal.as_str(), self.zero_terminal.as_str()]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wirenet_proto::{Message, voltage};

    use super::*;

    fn ac_load() -> (TerminalEngine, Arc<Load>) {
        let mut engine = TerminalEngine::new("loads");
        let load = Load::install(
            &mut engine,
            "H1.1",
            "H1.2",
            State::from(voltage::AC_ON),
            State::from(voltage::AC_OFF),
        )
        .unwrap();
        engine.on_connected();
        engine.take_outbound();
        (engine, load)
    }

    #[test]
    fn powered_with_zero_reference_is_on() {
        let (mut engine, load) = ac_load();

        engine.apply_remote_change("H1.2", State::from(voltage::AC_OFF)).unwrap();
        assert!(!load.is_on());

        engine.apply_remote_change("H1.1", State::from(voltage::AC_ON)).unwrap();
        assert!(load.is_on());
        assert!(!engine.has_outbound());
    }

    #[test]
    fn zero_reference_arriving_last_turns_on() {
        let (mut engine, load) = ac_load();

        engine.apply_remote_change("H1.1", State::from(voltage::AC_ON)).unwrap();
        assert!(!load.is_on());

        engine.apply_remote_change("H1.2", State::from(voltage::AC_OFF)).unwrap();
        assert!(load.is_on());
    }

    #[test]
    fn powered_with_wrong_zero_normalizes_zero_terminal() {
        let (mut engine, load) = ac_load();

        engine.apply_remote_change("H1.2", State::from(voltage::DC_OFF)).unwrap();
        engine.apply_remote_change("H1.1", State::from(voltage::AC_ON)).unwrap();

        assert!(!load.is_on());
        assert_eq!(engine.take_outbound(), vec![Message::state_change("H1.2", State::NoState)]);
    }

    #[test]
    fn power_loss_turns_off_and_releases_zero() {
        let (mut engine, load) = ac_load();
        engine.apply_remote_change("H1.2", State::from(voltage::AC_OFF)).unwrap();
        engine.apply_remote_change("H1.1", State::from(voltage::AC_ON)).unwrap();
        assert!(load.is_on());

        engine.apply_remote_change("H1.1", State::NoState).unwrap();

        assert!(!load.is_on());
        assert_eq!(engine.take_outbound(), vec![Message::state_change("H1.2", State::NoState)]);
    }

    #[test]
    fn same_terminal_twice_is_invalid() {
        let mut engine = TerminalEngine::new("loads");
        let result = Load::install(
            &mut engine,
            "H1.1",
            "H1.1",
            State::from(voltage::AC_ON),
            State::from(voltage::AC_OFF),
        );
        assert!(matches!(result, Err(EngineError::InvalidDevice { .. })));
        assert_eq!(engine.terminal_count(), 0);
    }
}
