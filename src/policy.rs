//! Failure policy per external dependency.
//!
//! Advisory controls fail open, anything that guards money fails closed.
//! Services look their dependency up here instead of deciding inside an error branch.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FailurePolicy {
    /// Treat the dependency's failure as "allow" and log a degraded-mode event.
    FailOpen,
    /// Abort the operation. Retryable storage conflicts are retried `max_retries` times first.
    FailClosed { max_retries: u32 },
}

impl FailurePolicy {
    pub fn fails_open(&self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            FailurePolicy::FailOpen => 0,
            FailurePolicy::FailClosed { max_retries } => *max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DependencyPolicies {
    /// External fraud-scoring model.
    pub fraud_scorer: FailurePolicy,
    /// Rate-limit state reads and writes.
    pub rate_limit_state: FailurePolicy,
    /// Balances, ledger rows, payment sessions and the merchant blacklist.
    pub storage: FailurePolicy,
}

impl DependencyPolicies {
    pub const DEFAULT_STORAGE_RETRIES: u32 = 3;

    pub fn with_storage_retries(max_retries: u32) -> Self {
        Self {
            storage: FailurePolicy::FailClosed { max_retries },
            ..Self::default()
        }
    }
}

impl Default for DependencyPolicies {
    fn default() -> Self {
        Self {
            fraud_scorer: FailurePolicy::FailOpen,
            rate_limit_state: FailurePolicy::FailOpen,
            storage: FailurePolicy::FailClosed {
                max_retries: Self::DEFAULT_STORAGE_RETRIES,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_dependency_roles() {
        let policies = DependencyPolicies::default();
        assert!(policies.fraud_scorer.fails_open());
        assert!(policies.rate_limit_state.fails_open());
        assert!(!policies.storage.fails_open());
        assert_eq!(policies.storage.max_retries(), 3);
    }

    #[test]
    fn storage_retries_are_configurable() {
        let policies = DependencyPolicies::with_storage_retries(1);
        assert_eq!(policies.storage.max_retries(), 1);
        assert!(policies.fraud_scorer.fails_open());
    }
}
