//! Deterministic environment: virtual clock plus seeded RNG.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tern_core::Environment;

/// Simulation environment.
///
/// - **Virtual time**: `unix_time()` is a fixed epoch plus tokio's timer
///   clock, so tests running with `start_paused = true` advance it
///   instantly through sleeps.
/// - **Seeded RNG**: ChaCha20 seeded per test; clones share the generator
///   state so ids drawn anywhere in the session stay one reproducible
///   sequence.
///
/// Must be constructed inside a tokio runtime.
#[derive(Clone)]
pub struct SimEnv {
    epoch: Duration,
    started: tokio::time::Instant,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Simulation starting at a fixed epoch with the default seed.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Simulation with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            epoch: Duration::from_secs(1_700_000_000),
            started: tokio::time::Instant::now(),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn unix_time(&self) -> Duration {
        self.epoch + self.started.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("sim rng poisoned").fill_bytes(buffer);
    }
}
