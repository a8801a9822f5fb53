//! Retry-with-deadline bookkeeping for cloud-side teardown.
//!
//! Terminating a cloud resource can fail for a long time (API outages,
//! dependent resources still attached). The pipeline keeps retrying, spaced
//! by [`TERMINATION_RETRY_TIMEOUT`], until [`TERMINATION_RETRY_MAX_DURATION`]
//! has passed since the first failure. Past that deadline the resource is
//! force-marked terminated and the operator has to clean up by hand.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::to_delta;

/// Minimum spacing between two termination attempts.
pub const TERMINATION_RETRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Time after the first failure past which termination is forced.
pub const TERMINATION_RETRY_MAX_DURATION: Duration = Duration::from_secs(15 * 60);

/// Persisted retry timestamps of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminationRetry {
    pub first_retry_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Try again later; persist the new timestamps.
    Retry(TerminationRetry),
    /// Deadline reached; stop trying.
    GiveUp,
}

impl TerminationRetry {
    /// Whether enough time passed since the last attempt to try again.
    pub fn should_attempt(&self, now: DateTime<Utc>) -> bool {
        self.last_retry_at
            .is_none_or(|last| now >= last + to_delta(TERMINATION_RETRY_TIMEOUT))
    }

    /// Records a failed attempt at `now`.
    pub fn record_failure(&self, now: DateTime<Utc>) -> RetryOutcome {
        let first = self.first_retry_at.unwrap_or(now);
        if now >= first + to_delta(TERMINATION_RETRY_MAX_DURATION) {
            return RetryOutcome::GiveUp;
        }
        RetryOutcome::Retry(Self {
            first_retry_at: Some(first),
            last_retry_at: Some(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_first_failure_never_gives_up() {
        let now = Utc::now();
        let outcome = TerminationRetry::default().record_failure(now);
        assert_eq!(
            outcome,
            RetryOutcome::Retry(TerminationRetry {
                first_retry_at: Some(now),
                last_retry_at: Some(now),
            })
        );
    }

    #[test]
    fn test_attempts_are_spaced() {
        let now = Utc::now();
        let retry = TerminationRetry {
            first_retry_at: Some(now),
            last_retry_at: Some(now),
        };
        assert!(!retry.should_attempt(now + TimeDelta::seconds(59)));
        assert!(retry.should_attempt(now + TimeDelta::seconds(60)));
        assert!(TerminationRetry::default().should_attempt(now));
    }

    #[test]
    fn test_gives_up_exactly_at_deadline() {
        let start = Utc::now();
        let retry = TerminationRetry {
            first_retry_at: Some(start),
            last_retry_at: Some(start + TimeDelta::seconds(840)),
        };
        assert!(matches!(
            retry.record_failure(start + TimeDelta::seconds(899)),
            RetryOutcome::Retry(_)
        ));
        assert_eq!(
            retry.record_failure(start + TimeDelta::seconds(900)),
            RetryOutcome::GiveUp
        );
    }
}
