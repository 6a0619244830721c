//! Failure classification and per-node retry policy.

use std::time::Duration;

use operators::OperatorError;
use serde::{Deserialize, Serialize};

/// Why a node attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operator did not return within the node timeout.
    Timeout,
    /// The operator reported a failure.
    Operator,
    /// The operator's call to an external service never completed.
    Transport,
    /// The input did not satisfy the operator's schema.
    InvalidInput,
    /// The node's output collided with another node's under the workflow's
    /// merge policy.
    MergeConflict,
    /// The run was cancelled while the node was in flight.
    Cancelled,
}

impl FailureKind {
    /// Only failures that can plausibly go away on a second attempt are
    /// retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Operator | Self::Transport)
    }
}

impl From<&OperatorError> for FailureKind {
    fn from(err: &OperatorError) -> Self {
        match err {
            OperatorError::Operator(_) => Self::Operator,
            OperatorError::Transport(_) => Self::Transport,
            OperatorError::InvalidInput(_) => Self::InvalidInput,
        }
    }
}

/// A classified node failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl NodeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<OperatorError> for NodeFailure {
    fn from(err: OperatorError) -> Self {
        Self::new(FailureKind::from(&err), err.message())
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Per-node retry policy with capped exponential back-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further one.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Decide what to do after attempt number `attempt` failed with `kind`.
    pub fn decide(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if kind.is_retryable() && attempt <= self.max_retries {
            RetryDecision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(FailureKind::Transport, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        let delays: Vec<u64> = (1..=5).map(|a| policy.backoff(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn retries_until_budget_is_spent() {
        let policy = RetryPolicy::with_retries(2);
        assert!(matches!(policy.decide(FailureKind::Timeout, 1), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(FailureKind::Operator, 2), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(FailureKind::Operator, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn deterministic_failures_are_not_retried() {
        let policy = RetryPolicy::with_retries(5);
        for kind in [
            FailureKind::InvalidInput,
            FailureKind::MergeConflict,
            FailureKind::Cancelled,
        ] {
            assert_eq!(policy.decide(kind, 1), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: 30_000,
        };
        assert_eq!(policy.backoff(200), Duration::from_millis(30_000));
    }

    #[test]
    fn operator_errors_are_classified() {
        let failure = NodeFailure::from(OperatorError::Transport("connection refused".into()));
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.message, "connection refused");
    }
}
