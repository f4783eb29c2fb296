//! Randomized backoff for the VIP allocation path.
//!
//! ConfigMap compare-and-swap attempts back off with a uniformly random
//! delay whose ceiling grows by a factor of 100 per attempt, so contending
//! allocators desynchronize quickly without a coordinator. Every other
//! transient failure in the control plane is logged and counted instead of
//! retried in-line; the next watcher event drives convergence.

use std::time::Duration;

use rand::Rng;

/// Sleep duration before allocation attempt `attempt` (0-based).
///
/// Uniformly random in `[0, 100^attempt)` milliseconds: always zero before
/// the first attempt, up to 100ms before the second, up to 10s before the
/// third.
pub fn allocation_backoff(attempt: u32) -> Duration {
    let ceiling = 100u64.saturating_pow(attempt);
    if ceiling <= 1 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..ceiling))
}
