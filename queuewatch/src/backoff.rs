//! Retry backoff carried in [`crate::job::JobOptions`].
//!
//! Two strategies are supported, mirroring what job queue brokers commonly offer:
//!
//! 1. Fixed: every retry waits the base delay.
//! 2. Exponential: the n-th retry waits `base * 2^(n - 1)`.
//!
//! Either can be modified by a relative jitter.
//!
//! # Example
//!
//! ```
//! # use queuewatch::backoff::Backoff;
//! # use std::time::Duration;
//! let backoff = Backoff::exponential(1000);
//!
//! assert_eq!(backoff.delay(1), Duration::from_millis(1000));
//! assert_eq!(backoff.delay(2), Duration::from_millis(2000));
//! assert_eq!(backoff.delay(3), Duration::from_millis(4000));
//! ```
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::job::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub base_delay_ms: i64,
    /// A random jitter added as a proportion of the computed delay, in `0.0..=1.0`.
    #[serde(default)]
    pub jitter: Option<f64>,
}

impl Backoff {
    pub const fn fixed(base_delay_ms: i64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
            jitter: None,
        }
    }

    pub const fn exponential(base_delay_ms: i64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
            jitter: None,
        }
    }

    pub const fn with_jitter(self, ratio: f64) -> Self {
        Self {
            jitter: Some(ratio),
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay_ms < 0 {
            return Err(ValidationError::BackoffDelay(self.base_delay_ms));
        }
        if let Some(ratio) = self.jitter.filter(|ratio| !(0.0..=1.0).contains(ratio)) {
            return Err(ValidationError::BackoffJitter(ratio));
        }
        Ok(())
    }

    /// The delay before the retry following the given number of attempts made.
    pub fn delay(&self, attempts_made: u32) -> Duration {
        let base = self.base_delay_ms.max(0) as u64;
        let millis = match self.kind {
            BackoffKind::Fixed => base,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(63);
                base.saturating_mul(1u64 << exponent)
            }
        };
        let millis = match self.jitter {
            Some(ratio) if ratio > 0.0 => apply_jitter(millis, ratio),
            _ => millis,
        };
        Duration::from_millis(millis)
    }
}

fn apply_jitter(millis: u64, ratio: f64) -> u64 {
    let millis = i64::try_from(millis).unwrap_or(i64::MAX);
    let delta = (millis as f64 * ratio).round() as i64;
    let jitter = rand::thread_rng().gen_range(-delta..=delta);
    millis.saturating_add(jitter).max(0) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed() {
        let backoff = Backoff::fixed(500);
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(7), Duration::from_millis(500));
    }

    #[test]
    fn exponential() {
        let backoff = Backoff::exponential(100);
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_saturates() {
        let backoff = Backoff::exponential(1000);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn jitter_stays_in_range() {
        let backoff = Backoff::fixed(1000).with_jitter(0.1);
        for _ in 0..100 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn jitter_on_saturated_delay_never_collapses() {
        let backoff = Backoff::exponential(2000).with_jitter(0.1);
        let floor = Duration::from_millis((i64::MAX as f64 * 0.85) as u64);
        for _ in 0..200 {
            assert!(backoff.delay(60) >= floor);
        }
    }

    #[test]
    fn jitter_out_of_range_is_invalid() {
        assert_eq!(
            Backoff::fixed(10).with_jitter(1.5).validate(),
            Err(ValidationError::BackoffJitter(1.5))
        );
        assert_eq!(
            Backoff::fixed(-10).validate(),
            Err(ValidationError::BackoffDelay(-10))
        );
    }
}
