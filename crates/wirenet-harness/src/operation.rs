//! Random operations for property and fuzz runs.
//!
//! Operations are generated from raw bytes through `arbitrary` and applied to
//! a [`Bench`]. Indices wrap around the clients and terminals that exist, so
//! every generated operation is meaningful.

use arbitrary::Arbitrary;
use wirenet_proto::{State, voltage};

use crate::bench::{Bench, ClientId};

/// Levels an operation can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Level {
    /// Unpowered.
    NoState,
    /// 230VAC.
    AcOn,
    /// 0VAC.
    AcOff,
    /// 48VDC.
    DcOn,
    /// 0VDC.
    DcOff,
}

impl Level {
    /// The state this level stands for.
    pub fn state(self) -> State {
        match self {
            Self::NoState => State::NoState,
            Self::AcOn => State::from(voltage::AC_ON),
            Self::AcOff => State::from(voltage::AC_OFF),
            Self::DcOn => State::from(voltage::DC_ON),
            Self::DcOff => State::from(voltage::DC_OFF),
        }
    }
}

/// One step of a random run.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// A client changes one of its own terminals.
    Drive {
        /// Client index (wraps).
        client: u8,
        /// Terminal index within the client (wraps).
        terminal: u8,
        /// New level.
        level: Level,
    },

    /// A client loses its connection.
    Disconnect {
        /// Client index (wraps).
        client: u8,
    },

    /// A client (re-)connects.
    Connect {
        /// Client index (wraps).
        client: u8,
    },

    /// Deliver some of the messages in flight.
    Deliver {
        /// Upper bound on deliveries.
        count: u8,
    },
}

impl Bench {
    /// Apply one operation.
    ///
    /// Engine errors from driving a terminal are part of the run and are only
    /// logged.
    pub fn apply(&mut self, operation: &Operation) {
        let clients = self.client_count();
        if clients == 0 {
            return;
        }
        let pick = |index: u8| ClientId::from_index(usize::from(index) % clients);

        match *operation {
            Operation::Drive { client, terminal, level } => {
                let id = pick(client);
                let result = self.with_engine(id, |engine| {
                    let names: Vec<String> = engine.terminal_names().map(str::to_string).collect();
                    if names.is_empty() {
                        return Ok(());
                    }
                    let name = &names[usize::from(terminal) % names.len()];
                    engine.apply_local_change(name, level.state())
                });
                if let Ok(Err(e)) = result {
                    tracing::debug!("Drive on {} failed: {}", id, e);
                }
            },
            Operation::Disconnect { client } => {
                if let Err(e) = self.disconnect(pick(client)) {
                    tracing::debug!("Disconnect failed: {}", e);
                }
            },
            Operation::Connect { client } => {
                if let Err(e) = self.connect(pick(client)) {
                    tracing::debug!("Connect failed: {}", e);
                }
            },
            Operation::Deliver { count } => {
                for _ in 0..count {
                    if !self.step() {
                        break;
                    }
                }
            },
        }
    }
}
