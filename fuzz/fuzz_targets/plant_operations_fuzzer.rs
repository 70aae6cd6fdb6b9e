//! Fuzz target for routing on the reference installation
//!
//! # Strategy
//!
//! - Operation sequences: terminal drives, disconnects, reconnects and
//!   partial deliveries, interleaved arbitrarily
//! - Any level on any terminal, including a source's own terminal and levels
//!   that short a supply
//!
//! # Invariants
//!
//! - NEVER panic while routing or reacting
//! - The network always settles within the step budget
//! - Every connected client owns all of its terminals on the router and no
//!   terminal outlives its connection
//! - The same seed and operations reproduce the same delivery log

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wirenet_harness::{Operation, PLANT_STEP_BUDGET, Plant};

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    operations: Vec<Operation>,
}

fn run(input: &FuzzInput) -> Plant {
    let mut plant = Plant::build(input.seed).expect("reference installation builds");
    for operation in &input.operations {
        plant.bench.apply(operation);
    }
    plant.bench.run_until_quiet(PLANT_STEP_BUDGET).expect("network settles");
    plant
}

fuzz_target!(|input: FuzzInput| {
    let plant = run(&input);

    if let Err(e) = plant.bench.check_invariants() {
        panic!("{e}");
    }

    let replay = run(&input);
    assert_eq!(plant.bench.delivered(), replay.bench.delivered(), "run is not deterministic");
});
