//! A small reference installation.
//!
//! ```text
//! Q1 (230VAC) ── F1.1 [breaker] F1.2 ─┬─ K1.11 [relay contact] K1.14 ── H1.X1 [lamp]
//!                                     └─ S1.1 [switch] S1.2 ── K1.A1 [relay coil]
//! N1 (0VAC) ──┬─ K1.A2 [relay coil]
//!             └─ H1.X2 [lamp]
//! ```

use std::sync::Arc;

use wirenet_client::{
    Device, TerminalEngine,
    devices::{CircuitBreaker, Load, Relay, Source, Supply},
};
use wirenet_core::WiringMode;
use wirenet_proto::{State, voltage};

use crate::bench::{Bench, BenchError, ClientId};

/// Wiring of the reference installation.
pub const PLANT_WIRING: &str = "\
# supply
Q1 -> F1.1
N1 -> K1.A2, H1.X2
# protected feed
F1.2 -> K1.11, S1.1
S1.2 -> K1.A1
# switched lamp
K1.14 -> H1.X1
";

/// Step budget large enough for any settle on the reference installation.
pub const PLANT_STEP_BUDGET: usize = 10_000;

/// Handles into a running reference installation.
#[derive(Debug)]
pub struct Plant {
    /// The bench everything is attached to.
    pub bench: Bench,
    /// Client owning `Q1` and `N1`.
    pub supply: ClientId,
    /// Client owning the breaker.
    pub breaker_client: ClientId,
    /// Client owning the relay.
    pub relay_client: ClientId,
    /// Client owning the switch terminals `S1.1` and `S1.2`.
    pub switch: ClientId,
    /// Client owning the lamp.
    pub lamp_client: ClientId,
    /// The breaker device.
    pub breaker: Arc<CircuitBreaker>,
    /// The relay device.
    pub relay: Arc<Relay>,
    /// The lamp device.
    pub lamp: Arc<Load>,
}

impl Plant {
    /// Build and connect the installation, then let it settle.
    ///
    /// # Errors
    ///
    /// Device installation failures, or `Unsettled`.
    pub fn build(seed: u64) -> Result<Self, BenchError> {
        let mut bench = Bench::from_wiring(seed, PLANT_WIRING, WiringMode::Symmetric);

        let mut engine = TerminalEngine::new("lamp");
        let lamp = Load::install(
            &mut engine,
            "H1.X1",
            "H1.X2",
            State::from(voltage::AC_ON),
            State::from(voltage::AC_OFF),
        )?;
        let lamp_client = bench.attach(engine, vec![lamp.clone() as Arc<dyn Device>])?;

        let mut engine = TerminalEngine::new("relay");
        let relay = Relay::install(
            &mut engine,
            Supply::Ac,
            "K1.A1",
            "K1.A2",
            vec![("K1.11".to_string(), "K1.14".to_string())],
        )?;
        let relay_client = bench.attach(engine, vec![relay.clone() as Arc<dyn Device>])?;

        let mut engine = TerminalEngine::new("switch");
        engine.register("S1.1", State::NoState, None)?;
        engine.register("S1.2", State::NoState, None)?;
        let switch = bench.attach(engine, Vec::new())?;

        let mut engine = TerminalEngine::new("breaker");
        let breaker = CircuitBreaker::install(&mut engine, "F1.1", "F1.2", true)?;
        let breaker_client = bench.attach(engine, vec![breaker.clone() as Arc<dyn Device>])?;

        let mut engine = TerminalEngine::new("supply");
        let line = Source::install(
            &mut engine,
            "Q1",
            State::from(voltage::AC_ON),
            State::from(voltage::AC_OFF),
        )?;
        let neutral = Source::install(
            &mut engine,
            "N1",
            State::from(voltage::AC_OFF),
            State::from(voltage::AC_ON),
        )?;
        let devices: Vec<Arc<dyn Device>> = vec![line, neutral];
        let supply = bench.attach(engine, devices)?;

        bench.run_until_quiet(PLANT_STEP_BUDGET)?;

        Ok(Self {
            bench,
            supply,
            breaker_client,
            relay_client,
            switch,
            lamp_client,
            breaker,
            relay,
            lamp,
        })
    }

    /// Drive the switch output.
    ///
    /// `true` copies the feed on `S1.1` to `S1.2`, `false` releases `S1.2`.
    ///
    /// # Errors
    ///
    /// Engine or settle failures.
    pub fn set_switch(&mut self, on: bool) -> Result<(), BenchError> {
        self.bench.with_engine(self.switch, |engine| {
            let state = if on { engine.get_state("S1.1")?.clone() } else { State::NoState };
            engine.apply_local_change("S1.2", state)
        })??;
        self.settle()
    }

    /// Open or close the breaker.
    ///
    /// # Errors
    ///
    /// Engine or settle failures.
    pub fn set_breaker(&mut self, closed: bool) -> Result<(), BenchError> {
        let breaker = self.breaker.clone();
        self.bench.with_engine(self.breaker_client, |engine| {
            if closed { breaker.close(engine) } else { breaker.open(engine) }
        })??;
        self.settle()
    }

    /// Deliver everything in flight.
    ///
    /// # Errors
    ///
    /// `Unsettled`.
    pub fn settle(&mut self) -> Result<(), BenchError> {
        self.bench.run_until_quiet(PLANT_STEP_BUDGET).map(|_| ())
    }
}
