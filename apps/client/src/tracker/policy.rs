use std::time::Duration;

use crate::config::Config;

const MIN_POLL_DELAY: Duration = Duration::from_millis(1);

/// Timer cadence of the tracker.
///
/// Status polls run every `interval` while the backend answers. After a
/// failed check the delay doubles per consecutive failure (capped at
/// `max_backoff`), and polling stops after `max_consecutive_failures`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub tick: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            tick: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_consecutive_failures: 10,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval,
            tick: config.tick_interval,
            max_backoff: config.max_poll_backoff,
            max_consecutive_failures: config.max_poll_failures,
        }
    }

    /// Delay before the next poll given the current failure streak.
    /// Never zero, so a misconfigured interval cannot spin the poll loop.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        let interval = self.interval.max(MIN_POLL_DELAY);
        if consecutive_failures == 0 {
            return interval;
        }
        let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
        interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff.max(interval))
    }

    pub fn should_give_up(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_consecutive_failures
    }
}
