//! Retry policy shared by the vendor adapters.
//!
//! Three total attempts; backoff doubles from one second. The backoff sleep
//! is a suspension point: cancellation is observed there by the caller
//! dropping the future.

use std::time::Duration;

use tracing::warn;

/// Total attempts per call (1 initial + 2 retries).
pub const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_BASE_MS: u64 = 1_000;

/// Backoff before retry number `retry` (1-based): 1s, 2s, 4s, …
pub fn backoff_delay(retry: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * (1 << (retry.saturating_sub(1))))
}

/// Log and sleep before a retry attempt.
pub async fn wait_before_retry(provider: &str, operation: &str, retry: u32) {
    let delay = backoff_delay(retry);
    warn!(
        provider,
        operation,
        retry,
        max_retries = MAX_ATTEMPTS - 1,
        delay_ms = delay.as_millis() as u64,
        "transient provider failure, backing off before retry"
    );
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }
}
