//! Exponential reconnect backoff.

use std::time::Duration;

use crate::config::ManagerConfig;
use crate::error::{MqttError, MqttResult};

/// Reconnect timing and give-up threshold.
///
/// `current` always stays within `[min, max]`. Each scheduled retry doubles
/// the delay for the one after it.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, max_attempts: Option<u32>) -> MqttResult<Self> {
        let mut backoff = Self {
            min,
            max,
            current: min,
            attempts: 0,
            max_attempts,
        };
        backoff.set_limits(min, max)?;
        Ok(backoff)
    }

    pub fn from_config(config: &ManagerConfig) -> MqttResult<Self> {
        Self::new(
            config.min_reconnect_delay(),
            config.max_reconnect_delay(),
            config.reconnect_attempt_limit(),
        )
    }

    /// Change the delay bounds, clamping the current delay into them.
    pub fn set_limits(&mut self, min: Duration, max: Duration) -> MqttResult<()> {
        if min > max {
            return Err(MqttError::InvalidArgument(format!(
                "minimum reconnect delay {min:?} exceeds maximum {max:?}"
            )));
        }
        self.min = min;
        self.max = max;
        self.current = self.current.clamp(min, max);
        Ok(())
    }

    /// Delay before the next attempt, or `None` once the attempt limit is hit.
    ///
    /// Doubles the delay used by the following call, capped at the maximum.
    pub fn schedule_next(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        Some(delay)
    }

    /// Count an attempt that is about to be made.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|limit| self.attempts >= limit)
    }

    pub fn reset(&mut self) {
        self.current = self.min;
        self.attempts = 0;
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let mut backoff = Backoff::new(secs(4), secs(64), None).unwrap();
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.schedule_next().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![4, 8, 16, 32, 64, 64, 64]);
    }

    #[test]
    fn current_delay_after_n_schedules() {
        for n in 0..10u32 {
            let mut backoff = Backoff::new(secs(4), secs(64), None).unwrap();
            for _ in 0..n {
                backoff.schedule_next();
            }
            let expected = (4u64 * 2u64.pow(n)).min(64);
            assert_eq!(backoff.current_delay(), secs(expected), "after {n} schedules");
        }
    }

    #[test]
    fn reset_restores_minimum() {
        let mut backoff = Backoff::new(secs(1), secs(30), Some(3)).unwrap();
        backoff.schedule_next();
        backoff.schedule_next();
        backoff.record_attempt();
        backoff.reset();
        assert_eq!(backoff.current_delay(), secs(1));
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn gives_up_after_attempt_limit() {
        let mut backoff = Backoff::new(secs(1), secs(8), Some(2)).unwrap();
        assert!(backoff.schedule_next().is_some());
        backoff.record_attempt();
        assert!(backoff.schedule_next().is_some());
        backoff.record_attempt();
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.schedule_next(), None);
    }

    #[test]
    fn unlimited_never_exhausts() {
        let mut backoff = Backoff::new(secs(1), secs(2), None).unwrap();
        for _ in 0..1000 {
            backoff.record_attempt();
        }
        assert!(backoff.schedule_next().is_some());
    }

    #[test]
    fn inverted_limits_rejected() {
        assert!(matches!(
            Backoff::new(secs(10), secs(5), None),
            Err(MqttError::InvalidArgument(_))
        ));

        let mut backoff = Backoff::new(secs(4), secs(64), None).unwrap();
        assert!(backoff.set_limits(secs(9), secs(3)).is_err());
        // Failed update leaves the old limits in place.
        assert_eq!(backoff.schedule_next(), Some(secs(4)));
    }

    #[test]
    fn set_limits_clamps_current() {
        let mut backoff = Backoff::new(secs(4), secs(64), None).unwrap();
        for _ in 0..5 {
            backoff.schedule_next();
        }
        backoff.set_limits(secs(1), secs(10)).unwrap();
        assert_eq!(backoff.current_delay(), secs(10));
    }
}
