//! In-memory ledger store.
//!
//! A unit of work holds the store-wide lock for its whole lifetime and edits a
//! private copy of the state; `commit` swaps the copy in. Units of work are
//! therefore fully serialized, and dropping one discards its changes.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::domain::{
    Account, BlacklistEntry, PaymentSession, RateLimitState, SessionStatus, Transaction,
    UserProfile,
};
use crate::ports::{
    AccountRepository, BlacklistRepository, LedgerStore, RateLimitRepository, SessionRepository,
    StoreError, StoreResult, TransactionRepository, UnitOfWork,
};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<Uuid, UserProfile>,
    accounts: HashMap<Uuid, Account>,
    /// Append order.
    transactions: Vec<Transaction>,
    rate_limits: HashMap<Uuid, RateLimitState>,
    sessions: HashMap<Uuid, PaymentSession>,
    blacklist: HashMap<String, BlacklistEntry>,
}

/// A thread-safe in-memory ledger for tests and simulations.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Row timestamps the store sets itself come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::default(),
            clock,
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            checkpoint: None,
            clock: self.clock.clone(),
        }))
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    checkpoint: Option<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryUnitOfWork {
    fn account_mut(&mut self, account_id: Uuid) -> StoreResult<&mut Account> {
        self.working
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))
    }

    fn ensure_unique_session_tx(&self, tx: &Transaction) -> StoreResult<()> {
        let Some(session_id) = tx.session_id.as_deref() else {
            return Ok(());
        };
        let taken = self
            .working
            .transactions
            .iter()
            .any(|other| other.id != tx.id && other.session_id.as_deref() == Some(session_id));
        if taken {
            return Err(StoreError::UniqueViolation(
                "transactions_session_id_unique".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for InMemoryUnitOfWork {
    async fn insert_user(&mut self, profile: &UserProfile) -> StoreResult<()> {
        if self.working.users.contains_key(&profile.id) {
            return Err(StoreError::UniqueViolation("users_pkey".to_string()));
        }
        self.working.users.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn insert_account(&mut self, account: &Account) -> StoreResult<()> {
        if !self.working.users.contains_key(&account.owner_id) {
            return Err(StoreError::NotFound(format!("user {}", account.owner_id)));
        }
        if account.balance < BigDecimal::from(0) {
            return Err(StoreError::Backend("accounts_balance_check".to_string()));
        }
        let conflict = self.working.accounts.values().find_map(|other| {
            if other.id == account.id {
                Some("accounts_pkey")
            } else if other.account_number == account.account_number {
                Some("accounts_account_number_key")
            } else if account.is_primary && other.is_primary && other.owner_id == account.owner_id {
                Some("accounts_one_primary_per_owner")
            } else {
                None
            }
        });
        if let Some(constraint) = conflict {
            return Err(StoreError::UniqueViolation(constraint.to_string()));
        }

        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_profile(&mut self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn lock_primary_account(&mut self, owner_id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.owner_id == owner_id && a.is_primary && a.is_active)
            .cloned())
    }

    async fn find_account_by_number(&mut self, account_number: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.account_number == account_number && a.is_active)
            .cloned())
    }

    async fn lock_account(&mut self, account_id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.working.accounts.get(&account_id).cloned())
    }

    async fn debit(&mut self, account_id: Uuid, amount: &BigDecimal) -> StoreResult<Option<BigDecimal>> {
        let now = self.clock.now();
        let account = self.account_mut(account_id)?;
        if &account.balance < amount {
            return Ok(None);
        }
        account.balance = &account.balance - amount;
        account.updated_at = now;
        Ok(Some(account.balance.clone()))
    }

    async fn credit(&mut self, account_id: Uuid, amount: &BigDecimal) -> StoreResult<BigDecimal> {
        let now = self.clock.now();
        let account = self.account_mut(account_id)?;
        account.balance = &account.balance + amount;
        account.updated_at = now;
        Ok(account.balance.clone())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryUnitOfWork {
    async fn append_transaction(&mut self, tx: &Transaction) -> StoreResult<Uuid> {
        if self.working.transactions.iter().any(|other| other.id == tx.id) {
            return Err(StoreError::UniqueViolation("transactions_pkey".to_string()));
        }
        self.ensure_unique_session_tx(tx)?;
        self.working.transactions.push(tx.clone());
        Ok(tx.id)
    }

    async fn get_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self.working.transactions.iter().find(|tx| tx.id == id).cloned())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> StoreResult<Option<Transaction>> {
        self.get_transaction(id).await
    }

    async fn update_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        self.ensure_unique_session_tx(tx)?;
        let slot = self
            .working
            .transactions
            .iter_mut()
            .find(|other| other.id == tx.id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id)))?;
        *slot = tx.clone();
        Ok(())
    }

    async fn list_transactions(&mut self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<Transaction>> {
        // Newest first; rows created at the same instant keep reverse append order.
        let mut rows: Vec<Transaction> = self
            .working
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn transactions_for_session(&mut self, session_id: &str) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter()
            .filter(|tx| tx.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RateLimitRepository for InMemoryUnitOfWork {
    async fn lock_rate_limit(&mut self, user_id: Uuid) -> StoreResult<RateLimitState> {
        Ok(self
            .working
            .rate_limits
            .entry(user_id)
            .or_insert_with(|| RateLimitState::new(user_id))
            .clone())
    }

    async fn save_rate_limit(&mut self, state: &RateLimitState) -> StoreResult<()> {
        self.working.rate_limits.insert(state.user_id, state.clone());
        Ok(())
    }

    async fn checkpoint(&mut self) -> StoreResult<()> {
        self.checkpoint = Some(self.working.clone());
        Ok(())
    }

    async fn rollback_to_checkpoint(&mut self) -> StoreResult<()> {
        if let Some(saved) = self.checkpoint.take() {
            self.working = saved;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryUnitOfWork {
    async fn upsert_session(&mut self, session: &PaymentSession) -> StoreResult<(PaymentSession, bool)> {
        if let Some(existing) = self
            .working
            .sessions
            .values()
            .find(|s| s.session_id == session.session_id)
        {
            return Ok((existing.clone(), true));
        }
        if self.working.sessions.contains_key(&session.id) {
            return Err(StoreError::UniqueViolation("payment_sessions_pkey".to_string()));
        }
        self.working.sessions.insert(session.id, session.clone());
        Ok((session.clone(), false))
    }

    async fn lock_session_by_row_id(&mut self, id: Uuid) -> StoreResult<Option<PaymentSession>> {
        Ok(self.working.sessions.get(&id).cloned())
    }

    async fn lock_session(&mut self, session_id: &str) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .working
            .sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn update_session(&mut self, session: &PaymentSession) -> StoreResult<()> {
        let slot = self
            .working
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NotFound(format!("payment session {}", session.id)))?;
        *slot = session.clone();
        Ok(())
    }

    async fn expire_sessions(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut expired = 0;
        for session in self.working.sessions.values_mut() {
            if session.is_expired(now) {
                session.status = SessionStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl BlacklistRepository for InMemoryUnitOfWork {
    async fn find_active_entry(&mut self, domain: &str) -> StoreResult<Option<BlacklistEntry>> {
        Ok(self
            .working
            .blacklist
            .get(domain)
            .filter(|entry| entry.is_active)
            .cloned())
    }

    async fn record_blacklist_hit(&mut self, entry_id: Uuid) -> StoreResult<i64> {
        let entry = self
            .working
            .blacklist
            .values_mut()
            .find(|entry| entry.id == entry_id)
            .ok_or_else(|| StoreError::NotFound(format!("blacklist entry {}", entry_id)))?;
        entry.blocked_transactions += 1;
        Ok(entry.blocked_transactions)
    }

    async fn upsert_entry(&mut self, entry: &BlacklistEntry) -> StoreResult<BlacklistEntry> {
        let stored = match self.working.blacklist.get_mut(&entry.domain) {
            Some(existing) => {
                existing.merchant_name = entry.merchant_name.clone();
                existing.reason = entry.reason.clone();
                existing.risk_level = entry.risk_level;
                existing.reported_by = entry.reported_by.clone();
                existing.is_active = true;
                existing.clone()
            }
            None => {
                self.working
                    .blacklist
                    .insert(entry.domain.clone(), entry.clone());
                entry.clone()
            }
        };
        Ok(stored)
    }

    async fn set_entry_active(&mut self, domain: &str, active: bool) -> StoreResult<bool> {
        match self.working.blacklist.get_mut(domain) {
            Some(entry) => {
                entry.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_entries(&mut self) -> StoreResult<Vec<BlacklistEntry>> {
        let mut entries: Vec<BlacklistEntry> = self.working.blacklist.values().cloned().collect();
        entries.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(entries)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::Gender;
    use chrono::{Duration, TimeZone};
    use crate::domain::{TransactionKind, TransactionStatus};

    async fn seeded() -> (InMemoryLedgerStore, Account) {
        let store = InMemoryLedgerStore::new();
        let profile = UserProfile::new("Ada", "Lovelace", Gender::Female, None);
        let account = Account::primary(profile.id, "10000001", BigDecimal::from(100));

        let mut uow = store.begin().await.unwrap();
        uow.insert_user(&profile).await.unwrap();
        uow.insert_account(&account).await.unwrap();
        uow.commit().await.unwrap();
        (store, account)
    }

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let (store, account) = seeded().await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.credit(account.id, &BigDecimal::from(50)).await.unwrap();
        }

        let mut uow = store.begin().await.unwrap();
        let reloaded = uow.lock_account(account.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance, BigDecimal::from(100));
    }

    #[tokio::test]
    async fn debit_refuses_to_overdraw() {
        let (store, account) = seeded().await;
        let mut uow = store.begin().await.unwrap();

        assert_eq!(uow.debit(account.id, &BigDecimal::from(150)).await.unwrap(), None);
        assert_eq!(
            uow.debit(account.id, &BigDecimal::from(40)).await.unwrap(),
            Some(BigDecimal::from(60))
        );
    }

    #[tokio::test]
    async fn session_id_is_unique_across_ledger_rows() {
        let (store, account) = seeded().await;
        let mut uow = store.begin().await.unwrap();
        let row = |status| {
            Transaction::new(
                account.owner_id,
                account.id,
                TransactionKind::Payment,
                &BigDecimal::from(10),
                BigDecimal::from(90),
                status,
                "Payment",
                Utc::now(),
            )
            .with_session("PAY_1", "shop.example.com", "ORDER-1")
        };

        uow.append_transaction(&row(TransactionStatus::Completed)).await.unwrap();
        let err = uow
            .append_transaction(&row(TransactionStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn balance_updates_are_stamped_by_the_store_clock() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = InMemoryLedgerStore::with_clock(Arc::new(clock.clone()));
        let profile = UserProfile::new("Ada", "Lovelace", Gender::Female, None);
        let account = Account::primary(profile.id, "10000001", BigDecimal::from(100));

        let mut uow = store.begin().await.unwrap();
        uow.insert_user(&profile).await.unwrap();
        uow.insert_account(&account).await.unwrap();
        uow.commit().await.unwrap();

        clock.advance(Duration::minutes(10));
        let mut uow = store.begin().await.unwrap();
        uow.debit(account.id, &BigDecimal::from(30)).await.unwrap();
        let debited = uow.lock_account(account.id).await.unwrap().unwrap();
        assert_eq!(debited.updated_at, start + Duration::minutes(10));

        clock.advance(Duration::minutes(5));
        uow.credit(account.id, &BigDecimal::from(5)).await.unwrap();
        let credited = uow.lock_account(account.id).await.unwrap().unwrap();
        assert_eq!(credited.updated_at, start + Duration::minutes(15));
    }

    #[tokio::test]
    async fn second_primary_account_is_rejected() {
        let (store, account) = seeded().await;
        let mut uow = store.begin().await.unwrap();
        let second = Account::primary(account.owner_id, "10000002", BigDecimal::from(0));

        let err = uow.insert_account(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn checkpoint_rollback_discards_only_later_writes() {
        let (store, account) = seeded().await;
        let mut uow = store.begin().await.unwrap();

        uow.credit(account.id, &BigDecimal::from(1)).await.unwrap();
        uow.checkpoint().await.unwrap();
        uow.credit(account.id, &BigDecimal::from(1000)).await.unwrap();
        uow.rollback_to_checkpoint().await.unwrap();

        let reloaded = uow.lock_account(account.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance, BigDecimal::from(101));
    }
}
