//! Exponential backoff with jitter for stream reconnects.
//!
//! Formula: `min(base * 2^attempt, max) ± 30% uniform jitter`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 10_000,
            jitter_fraction: 0.3,
        }
    }
}

/// Backoff duration for `attempt` (0-indexed).
pub fn next_backoff(attempt: u32, config: &BackoffConfig) -> Duration {
    let raw = (config.base_ms as f64) * 2f64.powi(attempt.min(30) as i32);
    let capped = raw.min(config.max_ms as f64);

    use rand::Rng;
    let spread = capped * config.jitter_fraction;
    let jitter = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((capped + jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let cfg = BackoffConfig { jitter_fraction: 0.0, ..Default::default() };
        assert_eq!(next_backoff(0, &cfg).as_millis(), 1_000);
        assert_eq!(next_backoff(1, &cfg).as_millis(), 2_000);
        assert_eq!(next_backoff(2, &cfg).as_millis(), 4_000);
        assert_eq!(next_backoff(3, &cfg).as_millis(), 8_000);
        assert_eq!(next_backoff(4, &cfg).as_millis(), 10_000);
        assert_eq!(next_backoff(20, &cfg).as_millis(), 10_000);
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let cfg = BackoffConfig::default();
        for attempt in 0..8 {
            let ms = next_backoff(attempt, &cfg).as_millis() as f64;
            let ideal = (1_000f64 * 2f64.powi(attempt as i32)).min(10_000.0);
            assert!(ms >= ideal * 0.69, "attempt {attempt}: {ms} below jitter floor");
            assert!(ms <= ideal * 1.31, "attempt {attempt}: {ms} above jitter ceiling");
        }
    }
}
