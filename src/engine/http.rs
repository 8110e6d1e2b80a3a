// ── Proxy Engine: Listener Reconnect Backoff ───────────────────────────────
//
// Shared backoff helper used by the Interactsh long-poll listener when a
// poll request fails and the registration needs to be retried without
// dropping it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum listener reconnect delay cap in milliseconds (30 seconds).
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Compute and sleep for the exponential backoff delay for listener
/// reconnection. `attempt` is 0-based; capped at 30s per `spec.md` §4.8's
/// "capped exponential backoff (1s -> 30s)".
pub async fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    let jittered = apply_jitter(capped_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

/// Apply +/-25% jitter to prevent thundering-herd effects across the
/// counter used in tests below.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(100) as u64
}

/// Simple jitter source using system clock nanos (no extra crate needed).
fn rand_jitter() -> i64 {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let salt = COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    ((nanos as u64).wrapping_add(salt) % 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        for base in [100, 1000, 5000, 30_000] {
            let result = apply_jitter(base);
            let lower = (base as f64 * 0.7) as u64;
            let upper = (base as f64 * 1.3) as u64;
            assert!(
                result >= lower.max(100) && result <= upper,
                "jitter({base}) = {result} not in [{lower}, {upper}]"
            );
        }
    }

    #[test]
    fn high_attempt_counts_stay_capped_before_jitter() {
        let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(20u32.min(12));
        assert_eq!(base_ms.min(MAX_RECONNECT_DELAY_MS), MAX_RECONNECT_DELAY_MS);
    }
}
