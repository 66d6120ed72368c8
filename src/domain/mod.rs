//! Framework-agnostic domain entities for the money-movement core.

pub mod account;
pub mod blacklist;
pub mod fraud;
pub mod rate_limit;
pub mod session;
pub mod transaction;

pub use account::{Account, Gender, UserProfile};
pub use blacklist::{BlacklistEntry, BlacklistRisk};
pub use fraud::{FraudDecision, FraudVerdict, Recommendation, RiskLevel, SenderProfile};
pub use rate_limit::{RateLimitEvent, RateLimitState};
pub use session::{Merchant, PaymentSession, SessionStatus, SessionTransitionError};
pub use transaction::{
    DomainBlockMeta, FraudMeta, Transaction, TransactionKind, TransactionStatus,
};

use thiserror::Error;

/// Raised when a persisted enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
