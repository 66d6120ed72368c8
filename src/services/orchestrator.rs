//! Deposit, withdraw and transfer use cases.
//!
//! Every call opens one unit of work, runs rate limit -> fraud gate -> ledger
//! mutation -> audit row inside it and commits once. Storage conflicts retry
//! the whole attempt up to the storage policy's bound.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::fraud_gate::FraudGate;
use super::ledger;
use super::rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimitStatus, RateLimiter};
use crate::clock::Clock;
use crate::domain::{
    Account, FraudDecision, FraudVerdict, SenderProfile, Transaction, TransactionKind,
    TransactionStatus, UserProfile,
};
use crate::error::{BankError, BankResult};
use crate::policy::DependencyPolicies;
use crate::ports::{FraudScorer, LedgerStore, UnitOfWork};
use crate::validation::{clean_description, validate_account_number, validate_amount};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub rate_limit: RateLimitConfig,
    pub policies: DependencyPolicies,
    pub session_ttl: Duration,
    /// Base delay between storage retries; grows linearly per attempt.
    pub retry_backoff: std::time::Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            policies: DependencyPolicies::default(),
            session_ttl: Duration::minutes(DEFAULT_SESSION_TTL_MINUTES),
            retry_backoff: std::time::Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub user_id: Uuid,
    pub recipient_account_number: String,
    pub amount: BigDecimal,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovementReceipt {
    pub transaction: Transaction,
    pub new_balance: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub transaction: Transaction,
    pub recipient_transaction_id: Uuid,
    pub new_balance: BigDecimal,
    pub fraud_verdict: FraudVerdict,
}

#[derive(Clone)]
pub struct BankingService {
    pub(super) store: Arc<dyn LedgerStore>,
    pub(super) rate_limiter: RateLimiter,
    pub(super) fraud_gate: FraudGate,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: ServiceSettings,
}

impl BankingService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        scorer: Arc<dyn FraudScorer>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            settings.rate_limit.clone(),
            settings.policies.rate_limit_state,
        );
        let fraud_gate = FraudGate::new(scorer, settings.policies.fraud_scorer);

        Self {
            store,
            rate_limiter,
            fraud_gate,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs `attempt` until it succeeds, fails for a non-retryable reason, or
    /// the storage retry budget is spent.
    pub(super) async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> BankResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BankResult<T>>,
    {
        let max_retries = self.settings.policies.storage.max_retries();
        let mut retries = 0;

        loop {
            match attempt().await {
                Err(e) if e.is_retryable() => {
                    if retries >= max_retries {
                        warn!(operation, retries, error = %e, "Storage conflict, retries exhausted");
                        return Err(BankError::Transient(e.to_string()));
                    }
                    retries += 1;
                    warn!(operation, attempt = retries, error = %e, "Storage conflict, retrying");
                    tokio::time::sleep(self.settings.retry_backoff * retries).await;
                }
                other => return other,
            }
        }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn deposit(&self, request: DepositRequest) -> BankResult<MovementReceipt> {
        validate_amount(&request.amount)?;
        let description = clean_description(&request.description)?;
        let request = &DepositRequest {
            description,
            ..request
        };

        self.with_retries("deposit", move || self.try_deposit(request))
            .await
    }

    async fn try_deposit(&self, request: &DepositRequest) -> BankResult<MovementReceipt> {
        let now = self.now();
        let mut uow = self.store.begin().await?;
        let account = primary_account(&mut *uow, request.user_id).await?;
        let description = describe(&request.description, "Deposit");

        let decision = self
            .rate_limiter
            .check(&mut *uow, request.user_id, &request.amount, None, now)
            .await?;
        if let RateLimitDecision::Denied(denial) = decision {
            let record = blocked_record(&account, TransactionKind::Deposit, &request.amount, &description, now)
                .with_block_reason(denial.reason.clone());
            commit_audit(uow, &record).await?;
            return Err(BankError::RateLimited(denial));
        }

        let new_balance = ledger::credit(&mut *uow, account.id, &request.amount).await?;
        let transaction = Transaction::new(
            account.owner_id,
            account.id,
            TransactionKind::Deposit,
            &request.amount,
            new_balance.clone(),
            TransactionStatus::Completed,
            description,
            now,
        );
        ledger::append(&mut *uow, &transaction).await?;
        uow.commit().await?;

        info!(transaction_id = %transaction.id, amount = %request.amount, "Deposit committed");
        Ok(MovementReceipt {
            transaction,
            new_balance,
        })
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn withdraw(&self, request: WithdrawRequest) -> BankResult<MovementReceipt> {
        validate_amount(&request.amount)?;
        let description = clean_description(&request.description)?;
        let request = &WithdrawRequest {
            description,
            ..request
        };

        self.with_retries("withdraw", move || self.try_withdraw(request))
            .await
    }

    async fn try_withdraw(&self, request: &WithdrawRequest) -> BankResult<MovementReceipt> {
        let now = self.now();
        let mut uow = self.store.begin().await?;
        let account = primary_account(&mut *uow, request.user_id).await?;
        let description = describe(&request.description, "Withdrawal");

        let decision = self
            .rate_limiter
            .check(&mut *uow, request.user_id, &request.amount, None, now)
            .await?;
        if let RateLimitDecision::Denied(denial) = decision {
            let record = blocked_record(&account, TransactionKind::Withdrawal, &request.amount, &description, now)
                .with_block_reason(denial.reason.clone());
            commit_audit(uow, &record).await?;
            return Err(BankError::RateLimited(denial));
        }

        if !account.has_funds(&request.amount) {
            return Err(BankError::InsufficientFunds);
        }

        let new_balance = ledger::debit(&mut *uow, account.id, &request.amount).await?;
        let transaction = Transaction::new(
            account.owner_id,
            account.id,
            TransactionKind::Withdrawal,
            &request.amount,
            new_balance.clone(),
            TransactionStatus::Completed,
            description,
            now,
        );
        ledger::append(&mut *uow, &transaction).await?;
        uow.commit().await?;

        info!(transaction_id = %transaction.id, amount = %request.amount, "Withdrawal committed");
        Ok(MovementReceipt {
            transaction,
            new_balance,
        })
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn transfer(&self, request: TransferRequest) -> BankResult<TransferReceipt> {
        validate_amount(&request.amount)?;
        validate_account_number(&request.recipient_account_number)?;
        let description = clean_description(&request.description)?;
        let request = &TransferRequest {
            description,
            ..request
        };

        self.with_retries("transfer", move || self.try_transfer(request))
            .await
    }

    async fn try_transfer(&self, request: &TransferRequest) -> BankResult<TransferReceipt> {
        let now = self.now();
        let mut uow = self.store.begin().await?;
        let sender = primary_account(&mut *uow, request.user_id).await?;

        if sender.account_number == request.recipient_account_number {
            return Err(crate::validation::ValidationError::new(
                "recipient_account_number",
                "cannot transfer to your own account",
            )
            .into());
        }

        let description = describe(&request.description, "Transfer");

        let decision = self
            .rate_limiter
            .check(&mut *uow, request.user_id, &request.amount, None, now)
            .await?;
        if let RateLimitDecision::Denied(denial) = decision {
            let record = blocked_record(&sender, TransactionKind::TransferOut, &request.amount, &description, now)
                .with_counterparty(request.recipient_account_number.clone(), None)
                .with_block_reason(denial.reason.clone());
            commit_audit(uow, &record).await?;
            return Err(BankError::RateLimited(denial));
        }

        let recipient = uow
            .find_account_by_number(&request.recipient_account_number)
            .await?
            .ok_or_else(|| BankError::RecipientNotFound(request.recipient_account_number.clone()))?;
        let recipient = uow
            .lock_account(recipient.id)
            .await?
            .filter(|account| account.is_active)
            .ok_or_else(|| BankError::RecipientNotFound(request.recipient_account_number.clone()))?;

        if !sender.has_funds(&request.amount) {
            return Err(BankError::InsufficientFunds);
        }

        let profile = sender_profile(&mut *uow, &sender).await?;
        let verdict = self
            .fraud_gate
            .score(&request.amount, &description, &profile, now)
            .await?;

        let status = match verdict.decision() {
            FraudDecision::Block => {
                let reason = verdict
                    .primary_reason()
                    .unwrap_or(crate::error::FRAUD_BLOCK_MESSAGE)
                    .to_string();
                let record = blocked_record(&sender, TransactionKind::TransferOut, &request.amount, &description, now)
                    .with_counterparty(recipient.account_number.clone(), Some(recipient.id))
                    .with_fraud(&verdict)
                    .with_block_reason(reason);
                commit_audit(uow, &record).await?;
                warn!(
                    transaction_id = %record.id,
                    risk = %verdict.risk_level,
                    "Transfer blocked by fraud gate"
                );
                return Err(BankError::FraudBlocked {
                    transaction_id: record.id,
                });
            }
            FraudDecision::Review => TransactionStatus::Pending,
            FraudDecision::Approve => TransactionStatus::Completed,
        };

        let sender_balance = ledger::debit(&mut *uow, sender.id, &request.amount).await?;
        let recipient_balance = ledger::credit(&mut *uow, recipient.id, &request.amount).await?;

        let mut outgoing = Transaction::new(
            sender.owner_id,
            sender.id,
            TransactionKind::TransferOut,
            &request.amount,
            sender_balance.clone(),
            status,
            description.clone(),
            now,
        )
        .with_counterparty(recipient.account_number.clone(), Some(recipient.id))
        .with_fraud(&verdict);
        let mut incoming = Transaction::new(
            recipient.owner_id,
            recipient.id,
            TransactionKind::TransferIn,
            &request.amount,
            recipient_balance,
            status,
            description,
            now,
        )
        .with_counterparty(sender.account_number.clone(), Some(sender.id));
        outgoing.linked_transaction_id = Some(incoming.id);
        incoming.linked_transaction_id = Some(outgoing.id);

        ledger::append(&mut *uow, &outgoing).await?;
        ledger::append(&mut *uow, &incoming).await?;
        uow.commit().await?;

        info!(
            transaction_id = %outgoing.id,
            recipient = %recipient.account_number,
            amount = %request.amount,
            status = %status,
            "Transfer committed"
        );
        Ok(TransferReceipt {
            recipient_transaction_id: incoming.id,
            transaction: outgoing,
            new_balance: sender_balance,
            fraud_verdict: verdict,
        })
    }

    /// Creates the user and their primary account.
    pub async fn open_account(
        &self,
        profile: UserProfile,
        account_number: &str,
        initial_balance: BigDecimal,
    ) -> BankResult<Account> {
        validate_account_number(account_number)?;
        if initial_balance < BigDecimal::from(0) {
            return Err(crate::validation::ValidationError::new(
                "initial_balance",
                "must not be negative",
            )
            .into());
        }

        let mut account = Account::primary(profile.id, account_number, initial_balance);
        account.created_at = self.now();
        account.updated_at = account.created_at;

        let mut uow = self.store.begin().await?;
        uow.insert_user(&profile).await?;
        uow.insert_account(&account).await?;
        uow.commit().await?;

        info!(user_id = %profile.id, account_number, "Account opened");
        Ok(account)
    }

    /// Newest first.
    pub async fn list_transactions(&self, user_id: Uuid, limit: Option<i64>) -> BankResult<Vec<Transaction>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
        let mut uow = self.store.begin().await?;
        Ok(uow.list_transactions(user_id, limit).await?)
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> BankResult<Transaction> {
        let mut uow = self.store.begin().await?;
        uow.get_transaction(transaction_id)
            .await?
            .ok_or(BankError::TransactionNotFound(transaction_id))
    }

    pub async fn primary_account(&self, user_id: Uuid) -> BankResult<Account> {
        let mut uow = self.store.begin().await?;
        primary_account(&mut *uow, user_id).await
    }

    pub async fn get_rate_limit_status(&self, user_id: Uuid) -> BankResult<RateLimitStatus> {
        self.with_retries("rate_limit_status", move || async move {
            let now = self.now();
            let mut uow = self.store.begin().await?;
            ensure_user(&mut *uow, user_id).await?;
            let status = self.rate_limiter.status(&mut *uow, user_id, now).await?;
            uow.commit().await?;
            Ok(status)
        })
        .await
    }

    /// Lifts a user's cooldown early. Returns whether a block was active.
    pub async fn clear_rate_limit_block(&self, user_id: Uuid) -> BankResult<bool> {
        let cleared = self
            .with_retries("rate_limit_clear", move || async move {
                let mut uow = self.store.begin().await?;
                ensure_user(&mut *uow, user_id).await?;
                let cleared = self.rate_limiter.clear_block(&mut *uow, user_id).await?;
                uow.commit().await?;
                Ok(cleared)
            })
            .await?;

        info!(user_id = %user_id, cleared, "Rate limit block cleared");
        Ok(cleared)
    }
}

pub(super) async fn primary_account(uow: &mut dyn UnitOfWork, user_id: Uuid) -> BankResult<Account> {
    uow.lock_primary_account(user_id)
        .await?
        .ok_or(BankError::AccountNotFound(user_id))
}

/// Rate-limit rows are keyed by user, so unknown ids must not create one.
async fn ensure_user(uow: &mut dyn UnitOfWork, user_id: Uuid) -> BankResult<()> {
    match uow.get_profile(user_id).await? {
        Some(_) => Ok(()),
        None => Err(BankError::AccountNotFound(user_id)),
    }
}

pub(super) async fn sender_profile(uow: &mut dyn UnitOfWork, account: &Account) -> BankResult<SenderProfile> {
    let profile = uow
        .get_profile(account.owner_id)
        .await?
        .ok_or(BankError::AccountNotFound(account.owner_id))?;
    Ok(SenderProfile::from_parts(&profile, account))
}

/// Audit row for a refused movement. Balance is the untouched current one.
pub(super) fn blocked_record(
    account: &Account,
    kind: TransactionKind,
    amount: &BigDecimal,
    description: &str,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction::new(
        account.owner_id,
        account.id,
        kind,
        amount,
        account.balance.clone(),
        TransactionStatus::Blocked,
        description,
        now,
    )
}

/// Writes the audit row and commits whatever the unit already holds.
pub(super) async fn commit_audit(mut uow: Box<dyn UnitOfWork>, record: &Transaction) -> BankResult<()> {
    ledger::append(&mut *uow, record).await?;
    uow.commit().await?;
    Ok(())
}

fn describe(description: &str, fallback: &str) -> String {
    if description.is_empty() {
        fallback.to_string()
    } else {
        description.to_string()
    }
}
