//! Retry policy: decides backoff delays for transient failures.

use rand::Rng;
use std::time::Duration;

use crate::config::PrismConfig;

/// Exponential backoff with a small random jitter.
///
/// delay = base_delay * multiplier^(retry_count) * (1 + jitter)
///
/// The jitter keeps a burst of same-moment failures from re-arriving as a
/// burst. Delays are strictly increasing across retries because the
/// exponential term dominates the jitter band.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,

    /// Max jitter fraction added on top (0.0 disables, used in tests).
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            jitter: 0.1,
        }
    }

    pub fn from_config(config: &PrismConfig) -> Self {
        Self::new(config.retry_base_delay(), config.retry_multiplier)
    }

    /// Delay before re-delivering after the given number of completed
    /// retries (0-indexed: first retry waits `base_delay`).
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = self.multiplier.powi(retry_count.min(i32::MAX as u32) as i32);
        let jitter = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(0.0..self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(base_secs * exp * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_is_strictly_increasing() {
        let p = policy();
        let d0 = p.next_delay(0);
        let d1 = p.next_delay(1);
        let d2 = p.next_delay(2);
        assert!(d1 > d0);
        assert!(d2 > d1);
        assert_eq!(d0, Duration::from_secs(2));
        assert_eq!(d1, Duration::from_secs(4));
        assert_eq!(d2, Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.1,
        };
        for _ in 0..50 {
            let d = p.next_delay(0);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_secs_f64(2.0 * 1.1));
        }
    }

    #[test]
    fn from_config_uses_configured_knobs() {
        let mut config = PrismConfig::default();
        config.retry_base_delay_ms = 100;
        config.retry_multiplier = 3.0;
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.base_delay, Duration::from_millis(100));
        assert_eq!(p.multiplier, 3.0);
    }
}
