//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (wall clock, sleeping, randomness). Message ids embed wall-clock
//! seconds and session ids are random, so hiding both behind a trait is
//! what makes the harness reproducible: the same seed and virtual clock
//! produce the same ids, the same frames, the same transcript.
//!
//! Session logic MUST NOT call `SystemTime::now()`, `tokio::time::sleep`,
//! or an RNG directly; everything goes through an `Environment`.
//!
//! # Invariants
//!
//! - `unix_time()` never goes backwards within one execution context
//! - With the same seed, `random_bytes()` produces the same sequence
//!   (simulation); in production it must be OS entropy

use std::time::Duration;

/// Abstract source of time, delay, and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time as a duration since the unix epoch.
    ///
    /// Wall-clock (not monotonic) because message ids embed epoch seconds
    /// that the server checks against its own clock. The session layer
    /// corrects for skew via its own time offset; implementations just
    /// report what the local clock says.
    fn unix_time(&self) -> Duration;

    /// Suspend the calling task for `duration`.
    ///
    /// Simulation environments advance virtual time instantly; production
    /// yields to the runtime timer.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// Production implementations must draw from OS entropy; simulations
    /// from a seeded generator whose seed is logged.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `i64`, used for session ids and ping ids.
    fn random_i64(&self) -> i64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        i64::from_le_bytes(bytes)
    }
}

/// Production environment: system clock, tokio timer, OS entropy.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn unix_time(&self) -> Duration {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::getrandom(buffer).expect("OS entropy unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_time_is_past_2020() {
        let env = SystemEnv;
        assert!(env.unix_time() > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn random_i64_varies() {
        let env = SystemEnv;
        // Two draws colliding is a 2^-64 event; treat as impossible.
        assert_ne!(env.random_i64(), env.random_i64());
    }
}
