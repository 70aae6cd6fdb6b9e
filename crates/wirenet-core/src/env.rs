//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples routing and client logic from system
//! resources (time, randomness, sleeping). The router draws connection tokens
//! from it and the client connection loop sleeps through it between connect
//! attempts, so both can run against a seeded environment under test.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (connection loops) sleeps; routing logic never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Production implementations use OS entropy. Simulation implementations
    /// use a seeded generator and must log the seed.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Production environment using system time and OS randomness.
///
/// - `std::time::Instant::now()` for time
/// - `tokio::time::sleep()` for sleeping
/// - `getrandom` for randomness
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}
