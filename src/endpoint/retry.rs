use std::time::Duration;

/// Default sleep after a failed client connect.
pub const DEFAULT_CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// How establishment reacts to a failed attempt.
///
/// An attempt is one full pass: create the role resource, then accept or
/// connect every session of the batch. A failed attempt is always rolled
/// back completely before the policy is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, `None` for unbounded.
    pub max_attempts: Option<u32>,

    /// Sleep between a rolled-back attempt and the next one.
    pub backoff: Duration,

    /// Sleep after a failed primary client connect, before the attempt is
    /// rolled back. Failed companion connects do not sleep.
    pub connect_retry_interval: Duration,
}

impl RetryPolicy {
    /// Retry until the peer shows up.
    pub const fn forever() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::ZERO,
            connect_retry_interval: DEFAULT_CONNECT_RETRY_INTERVAL,
        }
    }

    /// Give up after `max_attempts` attempts (at least one is always made).
    pub const fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::forever()
        }
    }

    pub const fn with_backoff(self, backoff: Duration) -> Self {
        Self { backoff, ..self }
    }

    pub const fn with_connect_retry_interval(self, interval: Duration) -> Self {
        Self {
            connect_retry_interval: interval,
            ..self
        }
    }

    /// Return `true` if another attempt may follow the `attempt`-th (1-based) one.
    #[inline]
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever()
    }
}

/// Establishment progress of an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishState {
    /// No establishment has run, or the endpoint was torn down.
    Idle,

    /// An attempt (1-based) is in progress.
    AwaitingPeer { attempt: u32 },

    /// The last establishment produced this many sessions.
    Established { sessions: usize },

    /// The retry policy gave up; nothing is held.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_policy_counts_attempts() {
        let policy = RetryPolicy::bounded(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::bounded(0).should_retry(1));
        assert!(RetryPolicy::forever().should_retry(u32::MAX));
    }

    #[test]
    fn builders_keep_other_fields() {
        let policy = RetryPolicy::bounded(2)
            .with_backoff(Duration::from_millis(5))
            .with_connect_retry_interval(Duration::from_millis(1));
        assert_eq!(policy.max_attempts, Some(2));
        assert_eq!(policy.backoff, Duration::from_millis(5));
        assert_eq!(policy.connect_retry_interval, Duration::from_millis(1));
        assert_eq!(RetryPolicy::default(), RetryPolicy::forever());
    }
}
