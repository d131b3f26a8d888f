use std::time::Duration;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * multiplier^(attempt - 1)`
    Exponential { base: Duration, multiplier: f64 },
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, multiplier } => {
                let exp = attempt.saturating_sub(1).min(32) as i32;
                base.mul_f64(multiplier.powi(exp))
            }
        }
    }
}

/// Retry budget evaluated by the queue runtime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(1000),
                multiplier: 2.0,
            },
        }
    }
}

impl RetryPolicy {
    pub fn is_final(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay before the next attempt, `None` once the budget is spent
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.is_final(attempt) {
            None
        } else {
            Some(self.backoff.delay(attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3), None);
        assert!(policy.is_final(3));
        assert!(!policy.is_final(2));
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Backoff::Fixed(Duration::from_millis(250)),
        };
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(1),
            multiplier: 1.5,
        };
        assert!(backoff.delay(u32::MAX) > Duration::ZERO);
    }
}
