//! Delays between backend list fetch attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry number `retry` (1-based).
///
/// Doubles from `base_delay_ms` up to `max_delay_ms`, then adds up to 10% jitter
/// so routers sharing one feed do not retry in lockstep. Retry 0 never waits.
pub fn retry_delay(retries: &RetryConfig, retry: u32) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
    let capped = retries
        .base_delay_ms
        .saturating_mul(factor)
        .min(retries.max_delay_ms);

    let spread = capped / 10;
    let jitter = if spread > 0 {
        rand::thread_rng().gen_range(0..spread)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retries(base_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
        RetryConfig {
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let config = retries(100, 1000);
        assert_eq!(retry_delay(&config, 0), Duration::ZERO);

        let first = retry_delay(&config, 1).as_millis();
        assert!((100..110).contains(&first));
        let third = retry_delay(&config, 3).as_millis();
        assert!((400..440).contains(&third));
        let capped = retry_delay(&config, 10).as_millis();
        assert!((1000..1100).contains(&capped));
    }

    #[test]
    fn test_large_retry_counts_saturate() {
        let delay = retry_delay(&retries(100, 5000), u32::MAX);
        assert!(delay.as_millis() >= 5000 && delay.as_millis() < 5500);
    }

    #[test]
    fn test_tiny_delays_have_no_jitter() {
        assert_eq!(retry_delay(&retries(1, 1), 4), Duration::from_millis(1));
    }
}
