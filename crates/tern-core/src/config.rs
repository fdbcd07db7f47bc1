//! Sender configuration.

use std::time::Duration;

/// Tunables for connection, retry, and fallback behavior.
///
/// Defaults match the reference deployment: unbounded connect retries,
/// one attempt on the primary before trying the fallback, a short fixed
/// pause before reconnecting, and a ten-second cadence for background
/// attempts to migrate from the fallback back to the primary.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum connect attempts before giving up; `None` retries forever
    pub connect_retries: Option<u32>,
    /// Attempts on the primary transport before switching to the fallback
    pub retries_to_fallback: u32,
    /// Delay between consecutive connect attempts
    pub connect_retry_delay: Duration,
    /// Pause before tearing down and reconnecting a broken session
    pub reconnect_delay: Duration,
    /// Cadence of background attempts to return to the primary transport
    pub retry_main_delay: Duration,
    /// Never use the fallback transport, even when the primary fails
    pub allow_fallback: bool,
    /// Start on the fallback transport and never migrate to the primary
    pub force_fallback: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            connect_retries: None,
            retries_to_fallback: 1,
            connect_retry_delay: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(1),
            retry_main_delay: Duration::from_secs(10),
            allow_fallback: true,
            force_fallback: false,
        }
    }
}

/// Long-poll wait parameters, interpreted by the server.
///
/// These are protocol constants rather than tunables; they are grouped
/// here so the one place that frames long-poll calls reads them by name.
#[derive(Debug, Clone, Copy)]
pub struct LongPollParams {
    /// Maximum delay before the server may answer early, ms
    pub max_delay: i32,
    /// Extra wait after new data arrives, ms
    pub wait_after: i32,
    /// Maximum total hold time, ms
    pub max_wait: i32,
}

impl Default for LongPollParams {
    fn default() -> Self {
        Self { max_delay: 500, wait_after: 150, max_wait: 3000 }
    }
}
