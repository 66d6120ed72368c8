use thiserror::Error;
use uuid::Uuid;

use crate::domain::{SessionStatus, SessionTransitionError};
use crate::ports::StoreError;
use crate::scorer::ScorerError;
use crate::services::rate_limiter::RateLimitDenial;
use crate::validation::ValidationError;

/// Message shown to a user whose transaction the scorer rejected. Scorer reasons stay in the audit row.
pub const FRAUD_BLOCK_MESSAGE: &str = "Transaction blocked due to high fraud risk";

#[derive(Error, Debug)]
pub enum BankError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("No active primary account for user {0}")]
    AccountNotFound(Uuid),

    #[error("Recipient account not found: {0}")]
    RecipientNotFound(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("{}", .0.message())]
    RateLimited(RateLimitDenial),

    #[error("Transaction blocked due to high fraud risk")]
    FraudBlocked { transaction_id: Uuid },

    #[error("Merchant domain {domain} is blacklisted: {reason}")]
    DomainBlocked { domain: String, reason: String },

    #[error("Payment session {0} has already been paid")]
    AlreadyPaid(String),

    #[error("No pending payment session {0}")]
    NoPendingSession(String),

    #[error("Payment session {0} has expired")]
    SessionExpired(String),

    #[error("Payment session {session_id} cannot be cancelled from {status}")]
    SessionNotCancellable {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Transaction {0} is not awaiting review")]
    NotUnderReview(Uuid),

    #[error("Service temporarily unavailable, please try again: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Fraud scorer error: {0}")]
    Scorer(#[from] ScorerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BankError {
    /// HTTP-equivalent status for an API layer.
    pub fn status_code(&self) -> u16 {
        match self {
            BankError::Validation(_) => 400,
            BankError::AccountNotFound(_)
            | BankError::RecipientNotFound(_)
            | BankError::NoPendingSession(_)
            | BankError::TransactionNotFound(_) => 404,
            BankError::AlreadyPaid(_)
            | BankError::SessionNotCancellable { .. }
            | BankError::NotUnderReview(_) => 409,
            BankError::SessionExpired(_) => 410,
            BankError::InsufficientFunds => 422,
            BankError::FraudBlocked { .. } | BankError::DomainBlocked { .. } => 403,
            BankError::RateLimited(_) => 429,
            BankError::Transient(_) | BankError::Scorer(_) => 503,
            BankError::Store(_) | BankError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BankError::Validation(_) => "validation_error",
            BankError::AccountNotFound(_) => "account_not_found",
            BankError::RecipientNotFound(_) => "recipient_not_found",
            BankError::InsufficientFunds => "insufficient_funds",
            BankError::RateLimited(_) => "rate_limited",
            BankError::FraudBlocked { .. } => "fraud_blocked",
            BankError::DomainBlocked { .. } => "domain_blocked",
            BankError::AlreadyPaid(_) => "already_paid",
            BankError::NoPendingSession(_) => "no_pending_session",
            BankError::SessionExpired(_) => "session_expired",
            BankError::SessionNotCancellable { .. } => "session_not_cancellable",
            BankError::TransactionNotFound(_) => "transaction_not_found",
            BankError::NotUnderReview(_) => "not_under_review",
            BankError::Transient(_) => "try_again",
            BankError::Store(_) => "storage_error",
            BankError::Scorer(_) => "scorer_unavailable",
            BankError::Internal(_) => "internal_error",
        }
    }

    /// Storage conflicts the orchestrator may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BankError::Store(e) if e.is_retryable())
    }
}

impl From<SessionTransitionError> for BankError {
    fn from(e: SessionTransitionError) -> Self {
        BankError::Internal(e.to_string())
    }
}

pub type BankResult<T> = Result<T, BankError>;
