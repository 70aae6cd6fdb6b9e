//! In-process test bench.
//!
//! Wires [`TerminalEngine`]s to a [`Router`] without sockets. Every message,
//! in either direction, goes through one FIFO, so a run is a deterministic
//! function of the seed and the calls made on the bench.
//!
//! ```text
//! engine ──Uplink──▶ ┌────────────┐ ──▶ Router::handle_message
//!                    │  in_flight │
//! engine ◀─Downlink─ └────────────┘ ◀── RouterAction::Send
//! ```

use std::{collections::VecDeque, fmt, sync::Arc};

use thiserror::Error;
use wirenet_client::{Device, EngineError, TerminalEngine};
use wirenet_core::{WiringMode, WiringTable};
use wirenet_proto::Message;
use wirenet_server::{ConnectionId, Router, RouterAction, RouterError, RouterSnapshot};

use crate::sim_env::SimEnv;

/// Index of a client on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(usize);

impl ClientId {
    /// Id of the client added `index`-th.
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Position in insertion order.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Errors raised by the bench itself.
#[derive(Debug, Error)]
pub enum BenchError {
    /// No client with this id was added.
    #[error("unknown {0}")]
    UnknownClient(ClientId),

    /// The router refused a new connection.
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    /// A call made through [`Bench::with_engine`] failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Deliveries kept coming after the step budget ran out.
    #[error("network did not settle after {steps} deliveries")]
    Unsettled {
        /// Deliveries performed before giving up.
        steps: usize,
    },

    /// Router and engines disagree.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// A message travelling between a client and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transit {
    /// Client to router.
    Uplink {
        /// Sending connection.
        connection: ConnectionId,
        /// Payload.
        message: Message,
    },

    /// Router to client.
    Downlink {
        /// Receiving connection.
        connection: ConnectionId,
        /// Payload.
        message: Message,
    },
}

struct Station {
    engine: TerminalEngine,
    devices: Vec<Arc<dyn Device>>,
    connection: Option<ConnectionId>,
    halted: Option<EngineError>,
}

/// Router plus client engines, driven step by step.
pub struct Bench {
    env: SimEnv,
    router: Router<SimEnv>,
    stations: Vec<Station>,
    in_flight: VecDeque<Transit>,
    delivered: Vec<Transit>,
}

impl Bench {
    /// Create a bench around `wiring`.
    pub fn new(env: SimEnv, wiring: WiringTable) -> Self {
        let router = Router::new(env.clone(), Arc::new(wiring));
        Self {
            env,
            router,
            stations: Vec::new(),
            in_flight: VecDeque::new(),
            delivered: Vec::new(),
        }
    }

    /// Create a bench from wiring text and a seed.
    pub fn from_wiring(seed: u64, wiring: &str, mode: WiringMode) -> Self {
        Self::new(SimEnv::with_seed(seed), WiringTable::parse(wiring, mode))
    }

    /// Add a client without connecting it.
    ///
    /// `devices` are the devices installed on `engine`; their
    /// [`Device::on_connected`] hooks run on every connect.
    pub fn add_client(&mut self, engine: TerminalEngine, devices: Vec<Arc<dyn Device>>) -> ClientId {
        self.stations.push(Station { engine, devices, connection: None, halted: None });
        ClientId(self.stations.len() - 1)
    }

    /// Add a client and connect it.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`].
    pub fn attach(
        &mut self,
        engine: TerminalEngine,
        devices: Vec<Arc<dyn Device>>,
    ) -> Result<ClientId, BenchError> {
        let id = self.add_client(engine, devices);
        self.connect(id)?;
        Ok(id)
    }

    /// Open a connection for a client, the way the runtime does after a
    /// successful connect: announce, then let every device assert itself.
    ///
    /// Connecting an already connected client returns its connection.
    ///
    /// # Errors
    ///
    /// `UnknownClient`, or `Router` if no connection token is available.
    pub fn connect(&mut self, id: ClientId) -> Result<ConnectionId, BenchError> {
        let station = self.station(id)?;
        if let Some(connection) = station.connection {
            return Ok(connection);
        }

        let connection = self.router.accept()?;
        let station = &mut self.stations[id.0];
        station.connection = Some(connection);
        station.halted = None;
        station.engine.on_connected();

        let mut failure = None;
        for device in &station.devices {
            if let Err(e) = device.on_connected(&mut station.engine) {
                if e.is_fatal() {
                    failure = Some(e);
                    break;
                }
                tracing::warn!("Device hook on {} failed: {}", id, e);
            }
        }

        match failure {
            Some(e) => self.halt(id.0, e),
            None => self.flush(id.0),
        }
        Ok(connection)
    }

    /// Drop a client's connection.
    ///
    /// # Errors
    ///
    /// `UnknownClient`.
    pub fn disconnect(&mut self, id: ClientId) -> Result<(), BenchError> {
        let Some(connection) = self.station(id)?.connection else {
            return Ok(());
        };
        let actions = self.router.close(connection, "connection closed");
        self.execute(actions);
        self.detach(id.0);
        Ok(())
    }

    /// Run `f` against a client's engine and queue whatever it produced.
    ///
    /// # Errors
    ///
    /// `UnknownClient`.
    pub fn with_engine<R>(
        &mut self,
        id: ClientId,
        f: impl FnOnce(&mut TerminalEngine) -> R,
    ) -> Result<R, BenchError> {
        self.station(id)?;
        let result = f(&mut self.stations[id.0].engine);
        self.flush(id.0);
        Ok(result)
    }

    /// Deliver the oldest message in flight.
    ///
    /// Returns false when nothing was pending.
    pub fn step(&mut self) -> bool {
        let Some(transit) = self.in_flight.pop_front() else {
            return false;
        };

        match &transit {
            Transit::Uplink { connection, message } => {
                if self.router.is_open(*connection) {
                    let actions = self.router.handle_message(*connection, message.clone());
                    self.execute(actions);
                } else {
                    tracing::debug!("Dropping uplink from closed connection {}", connection);
                }
            },

            Transit::Downlink { connection, message } => {
                match self.stations.iter().position(|s| s.connection == Some(*connection)) {
                    Some(index) => self.deliver(index, message.clone()),
                    None => tracing::debug!("Dropping downlink to closed connection {}", connection),
                }
            },
        }

        self.delivered.push(transit);
        true
    }

    /// Deliver until nothing is in flight.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// `Unsettled` if messages are still pending after `max_steps`.
    pub fn run_until_quiet(&mut self, max_steps: usize) -> Result<usize, BenchError> {
        let mut steps = 0;
        while !self.in_flight.is_empty() {
            if steps == max_steps {
                return Err(BenchError::Unsettled { steps });
            }
            self.step();
            steps += 1;
        }
        Ok(steps)
    }

    /// Cross-check the router's registry against the engines.
    ///
    /// Every connected client owns all of its terminals on the router, and
    /// every terminal the router knows belongs to a connected client.
    ///
    /// # Errors
    ///
    /// `Invariant` describing the first mismatch.
    pub fn check_invariants(&self) -> Result<(), BenchError> {
        for (index, station) in self.stations.iter().enumerate() {
            let Some(connection) = station.connection else {
                continue;
            };
            if !self.router.is_open(connection) {
                return Err(BenchError::Invariant(format!(
                    "client#{index} holds closed connection {connection}"
                )));
            }
            for name in station.engine.terminal_names() {
                if self.router.registry().owner(name) != Some(connection) {
                    return Err(BenchError::Invariant(format!(
                        "{name} is not owned by client#{index}"
                    )));
                }
            }
        }

        for (name, entry) in self.router.registry().terminals() {
            let owned = self.stations.iter().any(|s| s.connection == Some(entry.owner));
            if !owned {
                return Err(BenchError::Invariant(format!("{name} outlived its connection")));
            }
        }

        Ok(())
    }

    /// A client's engine.
    ///
    /// # Errors
    ///
    /// `UnknownClient`.
    pub fn engine(&self, id: ClientId) -> Result<&TerminalEngine, BenchError> {
        Ok(&self.station(id)?.engine)
    }

    /// A client's current connection.
    pub fn connection(&self, id: ClientId) -> Option<ConnectionId> {
        self.stations.get(id.0).and_then(|s| s.connection)
    }

    /// The fatal error that stopped a client, if any.
    pub fn halted(&self, id: ClientId) -> Option<&EngineError> {
        self.stations.get(id.0).and_then(|s| s.halted.as_ref())
    }

    /// Number of clients on the bench.
    pub fn client_count(&self) -> usize {
        self.stations.len()
    }

    /// The router.
    pub fn router(&self) -> &Router<SimEnv> {
        &self.router
    }

    /// Copy of the router's registry.
    pub fn snapshot(&self) -> RouterSnapshot {
        self.router.snapshot()
    }

    /// Messages still in flight.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Every transit handled so far, in delivery order.
    pub fn delivered(&self) -> &[Transit] {
        &self.delivered
    }

    /// Router-to-client messages a connection received so far.
    pub fn received_by(&self, connection: ConnectionId) -> Vec<&Message> {
        self.delivered
            .iter()
            .filter_map(|t| match t {
                Transit::Downlink { connection: to, message } if *to == connection => Some(message),
                _ => None,
            })
            .collect()
    }

    fn station(&self, id: ClientId) -> Result<&Station, BenchError> {
        self.stations.get(id.0).ok_or(BenchError::UnknownClient(id))
    }

    fn deliver(&mut self, index: usize, message: Message) {
        match self.stations[index].engine.handle_message(message) {
            Ok(()) => self.flush(index),
            Err(e) if e.is_fatal() => self.halt(index, e),
            Err(e) => {
                tracing::warn!("client#{} ignored delivery: {}", index, e);
                self.flush(index);
            },
        }
    }

    /// A device failed fatally: the client drops its connection.
    fn halt(&mut self, index: usize, error: EngineError) {
        tracing::error!("client#{} halted: {}", index, error);
        if let Some(connection) = self.stations[index].connection {
            let actions = self.router.close(connection, &error.to_string());
            self.execute(actions);
        }
        self.detach(index);
        self.stations[index].halted = Some(error);
    }

    fn detach(&mut self, index: usize) {
        let station = &mut self.stations[index];
        station.connection = None;
        station.engine.on_disconnected();
    }

    fn flush(&mut self, index: usize) {
        let station = &mut self.stations[index];
        let outbound = station.engine.take_outbound();
        let Some(connection) = station.connection else {
            return;
        };
        self.in_flight
            .extend(outbound.into_iter().map(|message| Transit::Uplink { connection, message }));
    }

    fn execute(&mut self, actions: Vec<RouterAction>) {
        for action in actions {
            match action {
                RouterAction::Send { connection, message } => {
                    self.in_flight.push_back(Transit::Downlink { connection, message });
                },
                RouterAction::Close { connection, reason } => {
                    tracing::debug!("Router closed {}: {}", connection, reason);
                    if let Some(index) =
                        self.stations.iter().position(|s| s.connection == Some(connection))
                    {
                        self.detach(index);
                    }
                },
            }
        }
    }
}

impl fmt::Debug for Bench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bench")
            .field("seed", &self.env.seed())
            .field("clients", &self.stations.len())
            .field("in_flight", &self.in_flight.len())
            .field("delivered", &self.delivered.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wirenet_proto::State;

    use super::*;

    fn plain(name: &str, terminals: &[&str]) -> TerminalEngine {
        let mut engine = TerminalEngine::new(name);
        for terminal in terminals {
            engine.register(*terminal, State::NoState, None).unwrap();
        }
        engine
    }

    #[test]
    fn connect_announces_to_router() {
        let mut bench = Bench::from_wiring(1, "A -> B", WiringMode::Symmetric);
        let id = bench.attach(plain("left", &["A"]), Vec::new()).unwrap();

        assert_eq!(bench.pending(), 2);
        assert_eq!(bench.run_until_quiet(10).unwrap(), 2);
        assert_eq!(bench.router().registry().owner("A"), bench.connection(id));
    }

    #[test]
    fn local_change_reaches_peer() {
        let mut bench = Bench::from_wiring(1, "A -> B", WiringMode::Symmetric);
        let left = bench.attach(plain("left", &["A"]), Vec::new()).unwrap();
        let right = bench.attach(plain("right", &["B"]), Vec::new()).unwrap();
        bench.run_until_quiet(10).unwrap();

        bench
            .with_engine(left, |e| e.apply_local_change("A", State::from("48VDC")))
            .unwrap()
            .unwrap();
        bench.run_until_quiet(10).unwrap();

        assert_eq!(bench.engine(right).unwrap().get_state("B").unwrap(), &State::from("48VDC"));
    }

    #[test]
    fn unknown_client_is_reported() {
        let mut bench = Bench::from_wiring(1, "", WiringMode::Symmetric);

        assert!(matches!(bench.connect(ClientId(3)), Err(BenchError::UnknownClient(_))));
    }

    #[test]
    fn step_budget_is_enforced() {
        let mut bench = Bench::from_wiring(1, "", WiringMode::Symmetric);
        bench.attach(plain("left", &["A"]), Vec::new()).unwrap();

        assert!(matches!(bench.run_until_quiet(1), Err(BenchError::Unsettled { steps: 1 })));
    }

    #[test]
    fn disconnect_forgets_terminals() {
        let mut bench = Bench::from_wiring(1, "", WiringMode::Symmetric);
        let id = bench.attach(plain("left", &["A"]), Vec::new()).unwrap();
        bench.run_until_quiet(10).unwrap();

        bench.disconnect(id).unwrap();

        assert!(bench.connection(id).is_none());
        assert!(bench.router().registry().owner("A").is_none());
        assert!(!bench.engine(id).unwrap().is_connected());
        bench.check_invariants().unwrap();
    }
}
