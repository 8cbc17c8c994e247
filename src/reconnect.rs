use core::fmt;
use core::time::Duration;

use smart_default::SmartDefault;

/// What to do after a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Give up; the connection terminates
    Stop,
    /// Wait this long before the next attempt
    Backoff(Duration),
}

/// Policy consulted between connection attempts
///
/// The connection calls [`next`](Self::next) after every failed attempt (and
/// once right after an established connection drops), and
/// [`reset`](Self::reset) once a handshake succeeds.
pub trait ReconnectionPolicy: fmt::Debug + Send + Sync + 'static {
    /// Advance the policy and return the decision for the upcoming attempt
    fn next(&mut self) -> Decision;

    /// Current decision without advancing, for observability
    fn current(&self) -> Decision;

    /// Forget accumulated backoff after a successful connection
    fn reset(&mut self);

    fn clone_policy(&self) -> Box<dyn ReconnectionPolicy>;
}

impl Clone for Box<dyn ReconnectionPolicy> {
    fn clone(&self) -> Self {
        self.clone_policy()
    }
}

/// Exponential backoff: doubling delays from `initial` up to `max`,
/// optionally giving up after `max_attempts` failures
#[derive(Debug, Clone, SmartDefault)]
pub struct ExponentialReconnection {
    #[default(Duration::from_millis(500))]
    pub initial: Duration,
    #[default(Duration::from_secs(30))]
    pub max: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    current: Option<Duration>,
    attempts: u32,
}

impl ExponentialReconnection {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    /// Give up after `limit` consecutive failures
    pub fn with_max_attempts(mut self, limit: u32) -> Self {
        self.max_attempts = Some(limit);
        self
    }

    fn exhausted(&self) -> bool {
        self.max_attempts
            .is_some_and(|limit| self.attempts > limit)
    }
}

impl ReconnectionPolicy for ExponentialReconnection {
    fn next(&mut self) -> Decision {
        self.attempts = self.attempts.saturating_add(1);
        if self.exhausted() {
            return Decision::Stop;
        }
        let backoff = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(backoff);
        Decision::Backoff(backoff)
    }

    fn current(&self) -> Decision {
        if self.exhausted() {
            Decision::Stop
        } else {
            Decision::Backoff(self.current.unwrap_or(self.initial))
        }
    }

    fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    fn clone_policy(&self) -> Box<dyn ReconnectionPolicy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut policy = ExponentialReconnection {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            ..ExponentialReconnection::default()
        };
        assert_eq!(policy.next(), Decision::Backoff(Duration::from_millis(100)));
        assert_eq!(policy.next(), Decision::Backoff(Duration::from_millis(200)));
        assert_eq!(policy.next(), Decision::Backoff(Duration::from_millis(350)));
        assert_eq!(policy.next(), Decision::Backoff(Duration::from_millis(350)));
    }

    #[test]
    fn reset_starts_over() {
        let mut policy = ExponentialReconnection::default();
        policy.next();
        policy.next();
        policy.reset();
        assert_eq!(policy.next(), Decision::Backoff(policy.initial));
    }

    #[test]
    fn stops_past_max_attempts() {
        let mut policy = ExponentialReconnection {
            max_attempts: Some(2),
            ..ExponentialReconnection::default()
        };
        assert!(matches!(policy.next(), Decision::Backoff(_)));
        assert!(matches!(policy.next(), Decision::Backoff(_)));
        assert_eq!(policy.next(), Decision::Stop);
        assert_eq!(policy.current(), Decision::Stop);
    }
}
