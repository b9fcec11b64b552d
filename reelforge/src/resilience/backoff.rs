//! Retry backoff with full jitter.

use rand::Rng;
use std::time::Duration;

/// Base delay before the first retry.
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Ceiling on any single backoff delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (1-based), with full jitter.
///
/// The envelope doubles per attempt from [`BACKOFF_BASE`] up to
/// [`BACKOFF_CAP`]; the actual delay is uniform in `[0, envelope]` so
/// simultaneous failures across workers do not retry in lockstep.
pub fn backoff_delay(attempt: u32) -> Duration {
    let envelope = backoff_envelope(attempt);
    let jittered = rand::thread_rng().gen_range(0..=envelope.as_millis() as u64);
    Duration::from_millis(jittered)
}

/// Upper bound of the jitter window for retry number `attempt` (1-based).
pub fn backoff_envelope(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let millis = (BACKOFF_BASE.as_millis() as u64).saturating_mul(1u64 << shift);
    Duration::from_millis(millis).min(BACKOFF_CAP)
}
