//! Deterministic simulation harness for wirenet.
//!
//! Runs the router and any number of device engines in one process, without
//! sockets, on a seeded [`SimEnv`]. A [`Bench`] delivers messages one at a
//! time from a single FIFO, so the same seed and the same calls always give
//! the same run.
//!
//! # Property Testing
//!
//! The `operation` module generates random [`Operation`] sequences through
//! `arbitrary`; property tests and the fuzzer apply them to a bench and check
//! [`Bench::check_invariants`] once the network settles.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bench;
pub mod operation;
pub mod plant;
pub mod sim_env;

pub use bench::{Bench, BenchError, ClientId, Transit};
pub use operation::{Level, Operation};
pub use plant::{PLANT_STEP_BUDGET, PLANT_WIRING, Plant};
pub use sim_env::SimEnv;
