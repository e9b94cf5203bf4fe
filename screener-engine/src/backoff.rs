//! Exponential backoff policy shared by the stream manager (reconnect
//! delays) and the rate-limit governor (issuance suspension).

use std::time::Duration;

/// Computes `min(base * 2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
}

impl ExponentialBackoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay for the given attempt number.
    ///
    /// The stream manager counts attempts from 1 (first reconnect waits
    /// `base * 2`); the governor counts throttle strikes from 0 (first
    /// suspension is exactly `base`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_schedule_doubles_then_caps() {
        let policy =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_millis(30_000));

        let delays: Vec<u128> = (1..=5).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_rate_limit_schedule_seeds_at_base() {
        let policy =
            ExponentialBackoff::new(Duration::from_millis(15_000), Duration::from_millis(120_000));

        let delays: Vec<u128> = (0..6).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![15_000, 30_000, 60_000, 120_000, 120_000, 120_000]);
    }

    #[test]
    fn test_huge_attempt_saturates_at_cap() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.delay(64), Duration::from_secs(30));
    }
}
