//! Reconnect policy for long-lived watches

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how quickly a dropped watch is re-established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up; `None` retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(with = "millis", rename = "initialBackoffMs", default = "default_initial")]
    pub initial_backoff: Duration,

    #[serde(with = "millis", rename = "maxBackoffMs", default = "default_max")]
    pub max_backoff: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial() -> Duration {
    Duration::from_secs(5)
}

fn default_max() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    1.0
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Same delay before every attempt, retrying forever
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
        }
    }

    /// Delay doubling from `initial` up to `max`
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_backoff: initial,
            max_backoff: max,
            multiplier: 2.0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before retry number `attempt` (1-based), `None` once exhausted
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_backoff.as_secs_f64() * factor;
        let capped = delay.min(self.max_backoff.as_secs_f64().max(self.initial_backoff.as_secs_f64()));
        Some(Duration::from_secs_f64(capped))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// Stateful iterator over a policy's delays
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Forget past failures after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.next_delay(self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(50), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_exponential_is_capped() {
        let policy =
            ReconnectPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<_> = policy.backoff().take(5).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_max_attempts() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2);
        let mut backoff = policy.backoff();
        assert!(backoff.next().is_some());
        assert!(backoff.next().is_some());
        assert!(backoff.next().is_none());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next().is_some());
    }

    #[test]
    fn test_yaml_shape() {
        let policy: ReconnectPolicy =
            serde_yaml::from_str("maxAttempts: 3\ninitialBackoffMs: 250\nmaxBackoffMs: 2000\nmultiplier: 2.0\n")
                .unwrap();
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));

        let defaults: ReconnectPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaults, ReconnectPolicy::default());
    }
}
