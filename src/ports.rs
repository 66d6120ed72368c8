//! Ports the core depends on: the ledger store and its unit of work, and the
//! external fraud scorer.
//!
//! A `UnitOfWork` is one atomic, isolated database transaction. Everything the
//! orchestrator writes for a single money movement goes through the same unit
//! and is committed once. Dropping a unit without `commit` rolls it back.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Account, BlacklistEntry, PaymentSession, RateLimitState, Transaction, UserProfile,
};
use crate::scorer::{ScorerError, ScorerRequest, ScorerResponse};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency failure, serialization failure or deadlock. Retryable.
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AccountRepository: Send {
    async fn insert_user(&mut self, profile: &UserProfile) -> StoreResult<()>;

    async fn insert_account(&mut self, account: &Account) -> StoreResult<()>;

    async fn get_profile(&mut self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;

    /// Loads and locks the owner's active primary account.
    async fn lock_primary_account(&mut self, owner_id: Uuid) -> StoreResult<Option<Account>>;

    async fn find_account_by_number(&mut self, account_number: &str)
        -> StoreResult<Option<Account>>;

    /// Loads and locks an account by id.
    async fn lock_account(&mut self, account_id: Uuid) -> StoreResult<Option<Account>>;

    /// Subtracts `amount` unless it would take the balance below zero.
    /// Returns the new balance, or `None` when funds are insufficient.
    async fn debit(&mut self, account_id: Uuid, amount: &BigDecimal)
        -> StoreResult<Option<BigDecimal>>;

    /// Adds `amount` and returns the new balance.
    async fn credit(&mut self, account_id: Uuid, amount: &BigDecimal) -> StoreResult<BigDecimal>;
}

#[async_trait]
pub trait TransactionRepository: Send {
    async fn append_transaction(&mut self, tx: &Transaction) -> StoreResult<Uuid>;

    async fn get_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>>;

    /// Loads and locks a ledger row.
    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>>;

    async fn update_transaction(&mut self, tx: &Transaction) -> StoreResult<()>;

    /// Newest first.
    async fn list_transactions(&mut self, owner_id: Uuid, limit: i64)
        -> StoreResult<Vec<Transaction>>;

    async fn transactions_for_session(&mut self, session_id: &str)
        -> StoreResult<Vec<Transaction>>;
}

#[async_trait]
pub trait RateLimitRepository: Send {
    /// Loads and locks the user's state, creating an empty one if absent.
    async fn lock_rate_limit(&mut self, user_id: Uuid) -> StoreResult<RateLimitState>;

    async fn save_rate_limit(&mut self, state: &RateLimitState) -> StoreResult<()>;

    /// Marks a point the unit of work can return to without aborting.
    async fn checkpoint(&mut self) -> StoreResult<()>;

    async fn rollback_to_checkpoint(&mut self) -> StoreResult<()>;
}

#[async_trait]
pub trait SessionRepository: Send {
    /// Inserts the session unless one with the same `session_id` exists.
    /// Returns the stored row and whether it was already there.
    async fn upsert_session(&mut self, session: &PaymentSession)
        -> StoreResult<(PaymentSession, bool)>;

    async fn lock_session_by_row_id(&mut self, id: Uuid) -> StoreResult<Option<PaymentSession>>;

    async fn lock_session(&mut self, session_id: &str) -> StoreResult<Option<PaymentSession>>;

    async fn update_session(&mut self, session: &PaymentSession) -> StoreResult<()>;

    /// Moves every pending session past its expiry to `expired`. Returns the count.
    async fn expire_sessions(&mut self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait BlacklistRepository: Send {
    async fn find_active_entry(&mut self, domain: &str) -> StoreResult<Option<BlacklistEntry>>;

    /// Increments the entry's blocked-transaction counter and returns the new value.
    async fn record_blacklist_hit(&mut self, entry_id: Uuid) -> StoreResult<i64>;

    /// Inserts the entry, or reactivates and overwrites the one with the same domain.
    async fn upsert_entry(&mut self, entry: &BlacklistEntry) -> StoreResult<BlacklistEntry>;

    async fn set_entry_active(&mut self, domain: &str, active: bool) -> StoreResult<bool>;

    async fn list_entries(&mut self) -> StoreResult<Vec<BlacklistEntry>>;
}

#[async_trait]
pub trait UnitOfWork:
    AccountRepository
    + TransactionRepository
    + RateLimitRepository
    + SessionRepository
    + BlacklistRepository
    + Send
{
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// External fraud-scoring model. Treated as a black box.
#[async_trait]
pub trait FraudScorer: Send + Sync {
    async fn score(&self, request: &ScorerRequest) -> Result<ScorerResponse, ScorerError>;
}
