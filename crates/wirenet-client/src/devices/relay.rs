//! Relay with normally-open contacts.

use std::sync::Arc;

use wirenet_proto::{State, voltage};

use crate::{
    engine::TerminalEngine,
    error::EngineError,
    reaction::{Device, TerminalReaction},
};

/// Power domain a relay switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supply {
    /// 230VAC mains.
    Ac,
    /// 48VDC bus.
    Dc,
}

impl Supply {
    /// Pick the supply whose zero level is `zero`.
    pub fn from_zero_state(zero: &State) -> Option<Self> {
        match zero.token() {
            voltage::AC_OFF => Some(Self::Ac),
            voltage::DC_OFF => Some(Self::Dc),
            _ => None,
        }
    }

    /// Energized level.
    pub fn on_state(self) -> State {
        match self {
            Self::Ac => State::from(voltage::AC_ON),
            Self::Dc => State::from(voltage::DC_ON),
        }
    }

    /// Zero level.
    pub fn off_state(self) -> State {
        match self {
            Self::Ac => State::from(voltage::AC_OFF),
            Self::Dc => State::from(voltage::DC_OFF),
        }
    }
}

/// A coil pair switching one or more normally-open contact pairs.
///
/// The coil is energized while its input terminal sits at the supply's on
/// level. Energized contacts pass their input state to their output; released
/// contacts hold the output at `None`.
#[derive(Debug)]
pub struct Relay {
    supply: Supply,
    coil_input: String,
    coil_output: String,
    contacts: Vec<(String, String)>,
}

impl Relay {
    /// Register the coil pair and every contact pair on `engine`.
    ///
    /// `contacts` lists `(input, output)` terminal pairs.
    ///
    /// # Errors
    ///
    /// `EngineError::InvalidDevice` when there are no contacts or a name is
    /// repeated, `EngineError::DuplicateTerminal` when a name is already
    /// registered on the engine.
    pub fn install(
        engine: &mut TerminalEngine,
        supply: Supply,
        coil_input: impl Into<String>,
        coil_output: impl Into<String>,
        contacts: Vec<(String, String)>,
    ) -> Result<Arc<Self>, EngineError> {
        if contacts.is_empty() {
            return Err(EngineError::InvalidDevice {
                reason: "relay needs at least one contact pair".to_string(),
            });
        }

        let relay = Arc::new(Self {
            supply,
            coil_input: coil_input.into(),
            coil_output: coil_output.into(),
            contacts,
        });

        super::validate_layout(engine, &relay.terminals())?;

        engine.register(relay.coil_input.clone(), State::NoState, Some(relay.clone()))?;
        engine.register(relay.coil_output.clone(), State::NoState, None)?;
        for (input, output) in &relay.contacts {
            engine.register(input.clone(), State::NoState, Some(relay.clone()))?;
            engine.register(output.clone(), State::NoState, None)?;
        }

        Ok(relay)
    }

    /// Power domain of the coil.
    pub fn supply(&self) -> Supply {
        self.supply
    }

    /// True while the coil input sits at the on level.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownTerminal` if the relay is not installed on
    /// `engine`.
    pub fn is_energized(&self, engine: &TerminalEngine) -> Result<bool, EngineError> {
        Ok(*engine.get_state(&self.coil_input)? == self.supply.on_state())
    }

    fn switch_contacts(&self, engine: &mut TerminalEngine, energized: bool) -> Result<(), EngineError> {
        for (input, output) in &self.contacts {
            let state = if energized { engine.get_state(input)?.clone() } else { State::NoState };
            engine.apply_local_change(output, state)?;
        }
        Ok(())
    }
}

impl TerminalReaction for Relay {
    fn on_state_change(
        &self,
        engine: &mut TerminalEngine,
        terminal: &str,
        state: &State,
    ) -> Result<(), EngineError> {
        if terminal == self.coil_input {
            let energized = *state == self.supply.on_state();
            tracing::debug!(
                "Relay coil {} {}",
                self.coil_input,
                if energized { "energized" } else { "released" }
            );
            return self.switch_contacts(engine, energized);
        }

        let Some((_, output)) = self.contacts.iter().find(|(input, _)| input == terminal) else {
            return Ok(());
        };
        let passed = if self.is_energized(engine)? { state.clone() } else { State::NoState };
        engine.apply_local_change(output, passed)
    }
}

impl Device for Relay {
    fn terminals(&self) -> Vec<&str> {
        let mut names = vec![self.coil_input.as_str(), self.coil_output.as_str()];
        for (input, output) in &self.contacts {
            names.push(input);
            names.push(output);
        }
        names
    }

    fn on_connected(&self, engine: &mut TerminalEngine) -> Result<(), EngineError> {
        engine.apply_local_change(&self.coil_output, self.supply.off_state())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wirenet_proto::Message;

    use super::*;

    fn ac_relay() -> (TerminalEngine, Arc<Relay>) {
        let mut engine = TerminalEngine::new("relays");
        let relay = Relay::install(
            &mut engine,
            Supply::Ac,
            "K1.A1",
            "K1.A2",
            vec![("K1.11".to_string(), "K1.14".to_string()), ("K1.21".to_string(), "K1.24".to_string())],
        )
        .unwrap();
        engine.on_connected();
        engine.take_outbound();
        (engine, relay)
    }

    #[test]
    fn supply_from_zero_state() {
        assert_eq!(Supply::from_zero_state(&State::from("0VAC")), Some(Supply::Ac));
        assert_eq!(Supply::from_zero_state(&State::from("0VDC")), Some(Supply::Dc));
        assert_eq!(Supply::from_zero_state(&State::from("12VDC")), None);
        assert_eq!(Supply::Dc.on_state(), State::from("48VDC"));
    }

    #[test]
    fn connect_drives_coil_output_to_zero() {
        let (mut engine, relay) = ac_relay();
        relay.on_connected(&mut engine).unwrap();
        assert_eq!(
            engine.take_outbound(),
            vec![Message::state_change("K1.A2", State::from(voltage::AC_OFF))]
        );
    }

    #[test]
    fn energized_coil_closes_contacts() {
        let (mut engine, relay) = ac_relay();
        engine.apply_remote_change("K1.11", State::from(voltage::AC_ON)).unwrap();
        assert!(!engine.has_outbound());

        engine.apply_remote_change("K1.A1", State::from(voltage::AC_ON)).unwrap();
        assert!(relay.is_energized(&engine).unwrap());
        assert_eq!(
            engine.take_outbound(),
            vec![Message::state_change("K1.14", State::from(voltage::AC_ON))]
        );

        engine.apply_remote_change("K1.A1", State::NoState).unwrap();
        assert_eq!(engine.take_outbound(), vec![Message::state_change("K1.14", State::NoState)]);
    }

    #[test]
    fn contact_input_follows_coil() {
        let (mut engine, _relay) = ac_relay();
        engine.apply_remote_change("K1.A1", State::from(voltage::AC_ON)).unwrap();
        engine.take_outbound();

        engine.apply_remote_change("K1.21", State::from(voltage::DC_ON)).unwrap();
        assert_eq!(
            engine.take_outbound(),
            vec![Message::state_change("K1.24", State::from(voltage::DC_ON))]
        );
    }

    #[test]
    fn wrong_supply_does_not_energize() {
        let (mut engine, relay) = ac_relay();
        engine.apply_remote_change("K1.11", State::from(voltage::AC_ON)).unwrap();
        engine.apply_remote_change("K1.A1", State::from(voltage::DC_ON)).unwrap();

        assert!(!relay.is_energized(&engine).unwrap());
        assert!(!engine.has_outbound());
    }

    #[test]
    fn relay_without_contacts_is_invalid() {
        let mut engine = TerminalEngine::new("relays");
        let result = Relay::install(&mut engine, Supply::Dc, "K2.A1", "K2.A2", Vec::new());
        assert!(matches!(result, Err(EngineError::InvalidDevice { .. })));
    }
}
