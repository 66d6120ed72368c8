//! Postgres implementation of the ledger store.
//!
//! One unit of work is one database transaction. Rows that a money movement
//! reads and then writes are taken with `SELECT ... FOR UPDATE`, so concurrent
//! units touching the same account, rate-limit row or session serialize.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{
    Account, BlacklistEntry, DomainBlockMeta, FraudMeta, PaymentSession, RateLimitEvent,
    RateLimitState, Transaction, UserProfile,
};
use crate::ports::{
    AccountRepository, BlacklistRepository, LedgerStore, RateLimitRepository, SessionRepository,
    StoreError, StoreResult, TransactionRepository, UnitOfWork,
};

const RATE_LIMIT_SAVEPOINT: &str = "SAVEPOINT rate_limit";
const RATE_LIMIT_ROLLBACK: &str = "ROLLBACK TO SAVEPOINT rate_limit";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Conflict(db.message().to_string()),
                Some("23505") => StoreError::UniqueViolation(
                    db.constraint().unwrap_or_else(|| db.message()).to_string(),
                ),
                _ => StoreError::Backend(e.to_string()),
            },
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountRepository for PgUnitOfWork {
    async fn insert_user(&mut self, profile: &UserProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, gender, date_of_birth, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.gender.as_str())
        .bind(profile.date_of_birth)
        .bind(profile.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_account(&mut self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, owner_id, account_number, balance, bank, country, shipping_address,
                is_primary, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(&account.account_number)
        .bind(&account.balance)
        .bind(&account.bank)
        .bind(&account.country)
        .bind(&account.shipping_address)
        .bind(account.is_primary)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_profile(&mut self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(UserRow::into_domain).transpose()
    }

    async fn lock_primary_account(&mut self, owner_id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT * FROM accounts
            WHERE owner_id = $1 AND is_primary AND is_active
            FOR UPDATE
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(AccountRow::into_domain))
    }

    async fn find_account_by_number(&mut self, account_number: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE account_number = $1 AND is_active",
        )
        .bind(account_number)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(AccountRow::into_domain))
    }

    async fn lock_account(&mut self, account_id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(AccountRow::into_domain))
    }

    async fn debit(&mut self, account_id: Uuid, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            UPDATE accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(balance)
    }

    async fn credit(&mut self, account_id: Uuid, amount: &BigDecimal) -> StoreResult<BigDecimal> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            UPDATE accounts
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut *self.tx)
        .await?;
        balance.ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))
    }
}

#[async_trait]
impl TransactionRepository for PgUnitOfWork {
    async fn append_transaction(&mut self, tx: &Transaction) -> StoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO transactions (
                id, owner_id, account_id, kind, amount, balance_after, status, description,
                counterparty_ref, counterparty_account_id, linked_transaction_id, session_id,
                merchant_domain, order_id, fraud, domain_block, block_reason, created_at, completed_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            RETURNING id
            "#,
        )
        .bind(tx.id)
        .bind(tx.owner_id)
        .bind(tx.account_id)
        .bind(tx.kind.as_str())
        .bind(&tx.amount)
        .bind(&tx.balance_after)
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(&tx.counterparty_ref)
        .bind(tx.counterparty_account_id)
        .bind(tx.linked_transaction_id)
        .bind(&tx.session_id)
        .bind(&tx.merchant_domain)
        .bind(&tx.order_id)
        .bind(tx.fraud.as_ref().map(Json))
        .bind(tx.domain_block.as_ref().map(Json))
        .bind(&tx.block_reason)
        .bind(tx.created_at)
        .bind(tx.completed_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn get_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn update_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, balance_after = $3, block_reason = $4, fraud = $5,
                linked_transaction_id = $6, completed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(&tx.balance_after)
        .bind(&tx.block_reason)
        .bind(tx.fraud.as_ref().map(Json))
        .bind(tx.linked_transaction_id)
        .bind(tx.completed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    async fn list_transactions(&mut self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE owner_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn transactions_for_session(&mut self, session_id: &str) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl RateLimitRepository for PgUnitOfWork {
    async fn lock_rate_limit(&mut self, user_id: Uuid) -> StoreResult<RateLimitState> {
        sqlx::query("INSERT INTO rate_limits (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        let row = sqlx::query_as::<_, RateLimitRow>(
            r#"
            SELECT user_id, events, blocked_until, block_reason
            FROM rate_limits
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.into_domain())
    }

    async fn save_rate_limit(&mut self, state: &RateLimitState) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE rate_limits
            SET events = $2, blocked_until = $3, block_reason = $4, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(state.user_id)
        .bind(Json(&state.events))
        .bind(state.blocked_until)
        .bind(&state.block_reason)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn checkpoint(&mut self) -> StoreResult<()> {
        sqlx::query(RATE_LIMIT_SAVEPOINT).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_checkpoint(&mut self) -> StoreResult<()> {
        sqlx::query(RATE_LIMIT_ROLLBACK).execute(&mut *self.tx).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgUnitOfWork {
    async fn upsert_session(&mut self, session: &PaymentSession) -> StoreResult<(PaymentSession, bool)> {
        let inserted = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO payment_sessions (
                id, session_id, user_id, merchant_name, merchant_url, merchant_domain, amount,
                order_id, description, status, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (session_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(session.id)
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(&session.merchant_name)
        .bind(&session.merchant_url)
        .bind(&session.merchant_domain)
        .bind(&session.amount)
        .bind(&session.order_id)
        .bind(&session.description)
        .bind(session.status.as_str())
        .bind(session.expires_at)
        .bind(session.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.into_domain()?, false));
        }

        let existing = self
            .lock_session(&session.session_id)
            .await?
            .ok_or_else(|| StoreError::Conflict(format!("session {} vanished", session.session_id)))?;
        Ok((existing, true))
    }

    async fn lock_session_by_row_id(&mut self, id: Uuid) -> StoreResult<Option<PaymentSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM payment_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(SessionRow::into_domain).transpose()
    }

    async fn lock_session(&mut self, session_id: &str) -> StoreResult<Option<PaymentSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM payment_sessions WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(SessionRow::into_domain).transpose()
    }

    async fn update_session(&mut self, session: &PaymentSession) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_sessions
            SET status = $2, completed_at = $3, transaction_id = $4
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(session.status.as_str())
        .bind(session.completed_at)
        .bind(session.transaction_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("payment session {}", session.id)));
        }
        Ok(())
    }

    async fn expire_sessions(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE payment_sessions SET status = 'expired' WHERE status = 'pending' AND expires_at < $1",
        )
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BlacklistRepository for PgUnitOfWork {
    async fn find_active_entry(&mut self, domain: &str) -> StoreResult<Option<BlacklistEntry>> {
        let row = sqlx::query_as::<_, BlacklistRow>(
            "SELECT * FROM merchant_blacklist WHERE domain = $1 AND is_active",
        )
        .bind(domain)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(BlacklistRow::into_domain).transpose()
    }

    async fn record_blacklist_hit(&mut self, entry_id: Uuid) -> StoreResult<i64> {
        let hits = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE merchant_blacklist
            SET blocked_transactions = blocked_transactions + 1
            WHERE id = $1
            RETURNING blocked_transactions
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        hits.ok_or_else(|| StoreError::NotFound(format!("blacklist entry {}", entry_id)))
    }

    async fn upsert_entry(&mut self, entry: &BlacklistEntry) -> StoreResult<BlacklistEntry> {
        let row = sqlx::query_as::<_, BlacklistRow>(
            r#"
            INSERT INTO merchant_blacklist (
                id, domain, merchant_name, reason, risk_level, reported_by, is_active,
                blocked_transactions, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, TRUE, 0, $7)
            ON CONFLICT (domain) DO UPDATE SET
                merchant_name = EXCLUDED.merchant_name,
                reason = EXCLUDED.reason,
                risk_level = EXCLUDED.risk_level,
                reported_by = EXCLUDED.reported_by,
                is_active = TRUE
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(&entry.domain)
        .bind(&entry.merchant_name)
        .bind(&entry.reason)
        .bind(entry.risk_level.as_str())
        .bind(&entry.reported_by)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        row.into_domain()
    }

    async fn set_entry_active(&mut self, domain: &str, active: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE merchant_blacklist SET is_active = $2 WHERE domain = $1")
            .bind(domain)
            .bind(active)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_entries(&mut self) -> StoreResult<Vec<BlacklistEntry>> {
        let rows = sqlx::query_as::<_, BlacklistRow>("SELECT * FROM merchant_blacklist ORDER BY domain")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(BlacklistRow::into_domain).collect()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

// Internal row types for SQLx. Not exposed outside the adapter.

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    gender: String,
    date_of_birth: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> StoreResult<UserProfile> {
        Ok(UserProfile {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            gender: self.gender.parse().map_err(corrupt)?,
            date_of_birth: self.date_of_birth,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    owner_id: Uuid,
    account_number: String,
    balance: BigDecimal,
    bank: String,
    country: String,
    shipping_address: String,
    is_primary: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> Account {
        Account {
            id: self.id,
            owner_id: self.owner_id,
            account_number: self.account_number,
            balance: self.balance,
            bank: self.bank,
            country: self.country,
            shipping_address: self.shipping_address,
            is_primary: self.is_primary,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    owner_id: Uuid,
    account_id: Uuid,
    kind: String,
    amount: BigDecimal,
    balance_after: BigDecimal,
    status: String,
    description: String,
    counterparty_ref: Option<String>,
    counterparty_account_id: Option<Uuid>,
    linked_transaction_id: Option<Uuid>,
    session_id: Option<String>,
    merchant_domain: Option<String>,
    order_id: Option<String>,
    fraud: Option<Json<FraudMeta>>,
    domain_block: Option<Json<DomainBlockMeta>>,
    block_reason: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            owner_id: self.owner_id,
            account_id: self.account_id,
            kind: self.kind.parse().map_err(corrupt)?,
            amount: self.amount,
            balance_after: self.balance_after,
            status: self.status.parse().map_err(corrupt)?,
            description: self.description,
            counterparty_ref: self.counterparty_ref,
            counterparty_account_id: self.counterparty_account_id,
            linked_transaction_id: self.linked_transaction_id,
            session_id: self.session_id,
            merchant_domain: self.merchant_domain,
            order_id: self.order_id,
            fraud: self.fraud.map(|Json(meta)| meta),
            domain_block: self.domain_block.map(|Json(meta)| meta),
            block_reason: self.block_reason,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RateLimitRow {
    user_id: Uuid,
    events: Json<Vec<RateLimitEvent>>,
    blocked_until: Option<DateTime<Utc>>,
    block_reason: Option<String>,
}

impl RateLimitRow {
    fn into_domain(self) -> RateLimitState {
        let Json(mut events) = self.events;
        events.sort_by_key(|event| event.at);
        RateLimitState {
            user_id: self.user_id,
            events,
            blocked_until: self.blocked_until,
            block_reason: self.block_reason,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    session_id: String,
    user_id: Uuid,
    merchant_name: String,
    merchant_url: String,
    merchant_domain: String,
    amount: BigDecimal,
    order_id: String,
    description: Option<String>,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    transaction_id: Option<Uuid>,
}

impl SessionRow {
    fn into_domain(self) -> StoreResult<PaymentSession> {
        Ok(PaymentSession {
            id: self.id,
            session_id: self.session_id,
            user_id: self.user_id,
            merchant_name: self.merchant_name,
            merchant_url: self.merchant_url,
            merchant_domain: self.merchant_domain,
            amount: self.amount,
            order_id: self.order_id,
            description: self.description,
            status: self.status.parse().map_err(corrupt)?,
            expires_at: self.expires_at,
            created_at: self.created_at,
            completed_at: self.completed_at,
            transaction_id: self.transaction_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BlacklistRow {
    id: Uuid,
    domain: String,
    merchant_name: String,
    reason: String,
    risk_level: String,
    reported_by: String,
    is_active: bool,
    blocked_transactions: i64,
    created_at: DateTime<Utc>,
}

impl BlacklistRow {
    fn into_domain(self) -> StoreResult<BlacklistEntry> {
        Ok(BlacklistEntry {
            id: self.id,
            domain: self.domain,
            merchant_name: self.merchant_name,
            reason: self.reason,
            risk_level: self.risk_level.parse().map_err(corrupt)?,
            reported_by: self.reported_by,
            is_active: self.is_active,
            blocked_transactions: self.blocked_transactions,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_enum_values_are_reported_as_corrupt_rows() {
        let row = BlacklistRow {
            id: Uuid::new_v4(),
            domain: "scam.example".to_string(),
            merchant_name: String::new(),
            reason: "phishing".to_string(),
            risk_level: "extreme".to_string(),
            reported_by: "System".to_string(),
            is_active: true,
            blocked_transactions: 0,
            created_at: Utc::now(),
        };

        assert!(matches!(row.into_domain(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(!StoreError::from(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
