//! Merchant payment sessions: idempotent create, exactly-once settle, cancel
//! and expiry.
//!
//! `payment_sessions.session_id` and `transactions.session_id` are unique in
//! storage. Settlement locks the session row, so concurrent settles for the
//! same session serialize and all but the first see a terminal state.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::fraud_gate::{normalize_domain, DomainCheck};
use super::ledger;
use super::orchestrator::{blocked_record, primary_account, sender_profile, BankingService};
use super::rate_limiter::RateLimitDecision;
use crate::domain::{
    Account, FraudDecision, FraudVerdict, Merchant, PaymentSession, SessionStatus, Transaction,
    TransactionKind, TransactionStatus,
};
use crate::error::{BankError, BankResult, FRAUD_BLOCK_MESSAGE};
use crate::ports::UnitOfWork;
use crate::validation::{
    clean_description, validate_amount, validate_merchant, validate_order_id, validate_session_id,
    ValidationError,
};

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub session_id: String,
    pub user_id: Uuid,
    pub merchant: Merchant,
    pub amount: BigDecimal,
    pub order_id: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub session_row_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub already_exists: bool,
}

#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub session_id: String,
    /// Row id handed back by `create_payment_session`. Optional fast path.
    pub session_row_id: Option<Uuid>,
    pub user_id: Uuid,
    pub merchant: Merchant,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub status: SessionStatus,
    pub transaction: Transaction,
    pub new_balance: BigDecimal,
    pub fraud_verdict: FraudVerdict,
}

impl BankingService {
    #[instrument(skip(self, request), fields(session_id = %request.session_id, user_id = %request.user_id))]
    pub async fn create_payment_session(&self, request: CreateSessionRequest) -> BankResult<SessionHandle> {
        validate_session_id(&request.session_id)?;
        validate_merchant(&request.merchant.name, &request.merchant.url)?;
        validate_amount(&request.amount)?;
        validate_order_id(&request.order_id)?;
        let description = request
            .description
            .as_deref()
            .map(clean_description)
            .transpose()?
            .filter(|d| !d.is_empty());
        let request = &CreateSessionRequest {
            description,
            ..request
        };

        self.with_retries("create_payment_session", move || self.try_create_session(request))
            .await
    }

    async fn try_create_session(&self, request: &CreateSessionRequest) -> BankResult<SessionHandle> {
        let now = self.now();
        let mut uow = self.store.begin().await?;

        if uow.get_profile(request.user_id).await?.is_none() {
            return Err(BankError::AccountNotFound(request.user_id));
        }

        let candidate = PaymentSession::new(
            request.session_id.clone(),
            request.user_id,
            &request.merchant,
            normalize_domain(&request.merchant.url),
            request.amount.clone(),
            request.order_id.clone(),
            request.description.clone(),
            now,
            self.settings.session_ttl,
        );

        let (mut session, already_exists) = uow.upsert_session(&candidate).await?;
        if session.is_expired(now) {
            session.transition(SessionStatus::Expired, now)?;
            uow.update_session(&session).await?;
        }
        uow.commit().await?;

        info!(
            session_row_id = %session.id,
            already_exists,
            status = %session.status,
            "Payment session ready"
        );
        Ok(SessionHandle {
            session_row_id: session.id,
            expires_at: session.expires_at,
            status: session.status,
            already_exists,
        })
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id, user_id = %request.user_id))]
    pub async fn settle_payment_session(&self, request: SettleRequest) -> BankResult<Settlement> {
        validate_session_id(&request.session_id)?;
        validate_merchant(&request.merchant.name, &request.merchant.url)?;
        validate_amount(&request.amount)?;
        let request = &request;

        self.with_retries("settle_payment_session", move || self.try_settle(request))
            .await
    }

    async fn try_settle(&self, request: &SettleRequest) -> BankResult<Settlement> {
        let now = self.now();
        let mut uow = self.store.begin().await?;

        let mut session = locate_session(&mut *uow, request).await?;
        if session.user_id != request.user_id {
            return Err(BankError::NoPendingSession(request.session_id.clone()));
        }

        match session.status {
            SessionStatus::Pending => {}
            SessionStatus::Completed => return Err(BankError::AlreadyPaid(request.session_id.clone())),
            _ => return Err(BankError::NoPendingSession(request.session_id.clone())),
        }

        if session.is_expired(now) {
            session.transition(SessionStatus::Expired, now)?;
            uow.update_session(&session).await?;
            uow.commit().await?;
            return Err(BankError::SessionExpired(request.session_id.clone()));
        }

        if normalize_domain(&request.merchant.url) != session.merchant_domain {
            return Err(ValidationError::new("merchant_url", "does not match the payment session").into());
        }
        if request.amount != session.amount {
            return Err(ValidationError::new("amount", "does not match the payment session").into());
        }

        // Rows left behind by an interrupted settle count as paid.
        let existing = uow.transactions_for_session(&session.session_id).await?;
        if existing.iter().any(|tx| {
            matches!(tx.status, TransactionStatus::Completed | TransactionStatus::Pending)
        }) {
            warn!(session_row_id = %session.id, "Pending session already has a ledger row");
            return Err(BankError::AlreadyPaid(request.session_id.clone()));
        }

        let account = primary_account(&mut *uow, session.user_id).await?;
        let description = session
            .description
            .clone()
            .unwrap_or_else(|| format!("Payment to {}", session.merchant_name));

        let decision = self
            .rate_limiter
            .check(&mut *uow, session.user_id, &session.amount, None, now)
            .await?;
        if let RateLimitDecision::Denied(denial) = decision {
            // No session id: the session stays pending and can be retried after the cooldown.
            let mut record = blocked_record(&account, TransactionKind::Payment, &session.amount, &description, now)
                .with_counterparty(session.merchant_name.clone(), None)
                .with_block_reason(denial.reason.clone());
            record.merchant_domain = Some(session.merchant_domain.clone());
            record.order_id = Some(session.order_id.clone());
            super::orchestrator::commit_audit(uow, &record).await?;
            return Err(BankError::RateLimited(denial));
        }

        let domain_check = self.fraud_gate.check_domain(&mut *uow, &session.merchant_url).await?;
        if let (Some(verdict), Some(meta)) = (domain_check.verdict(), domain_check.block_meta()) {
            let reason = meta.reason.clone();
            let record = session_record(&session, &account, &account.balance, TransactionStatus::Blocked, &description, now)
                .with_fraud(&verdict)
                .with_domain_block(meta)
                .with_block_reason(format!("Merchant domain blacklisted: {}", reason));
            close_session(uow, &mut session, &record, SessionStatus::Blocked, now).await?;

            if let DomainCheck::Blocked { hits, .. } = &domain_check {
                warn!(domain = %session.merchant_domain, hits, "Payment blocked by merchant blacklist");
            }
            return Err(BankError::DomainBlocked {
                domain: session.merchant_domain.clone(),
                reason,
            });
        }

        if !account.has_funds(&session.amount) {
            return Err(BankError::InsufficientFunds);
        }

        let profile = sender_profile(&mut *uow, &account).await?;
        let score_text = format!("{} {}", session.merchant_name, description);
        let verdict = self
            .fraud_gate
            .score(&session.amount, &score_text, &profile, now)
            .await?;

        let status = match verdict.decision() {
            FraudDecision::Block => {
                let reason = verdict
                    .primary_reason()
                    .unwrap_or(FRAUD_BLOCK_MESSAGE)
                    .to_string();
                let record = session_record(&session, &account, &account.balance, TransactionStatus::Blocked, &description, now)
                    .with_fraud(&verdict)
                    .with_block_reason(reason);
                close_session(uow, &mut session, &record, SessionStatus::Blocked, now).await?;
                warn!(transaction_id = %record.id, risk = %verdict.risk_level, "Payment blocked by fraud gate");
                return Err(BankError::FraudBlocked {
                    transaction_id: record.id,
                });
            }
            FraudDecision::Review => TransactionStatus::Pending,
            FraudDecision::Approve => TransactionStatus::Completed,
        };

        let new_balance = ledger::debit(&mut *uow, account.id, &session.amount).await?;
        let transaction = session_record(&session, &account, &new_balance, status, &description, now)
            .with_fraud(&verdict);

        ledger::append(&mut *uow, &transaction).await?;
        session.transaction_id = Some(transaction.id);
        session.transition(SessionStatus::Completed, now)?;
        uow.update_session(&session).await?;
        uow.commit().await?;

        info!(
            transaction_id = %transaction.id,
            amount = %session.amount,
            status = %status,
            "Payment session settled"
        );
        Ok(Settlement {
            status: session.status,
            transaction,
            new_balance,
            fraud_verdict: verdict,
        })
    }

    /// Cancels a pending session on behalf of its owner.
    pub async fn cancel_payment_session(&self, session_id: &str, user_id: Uuid) -> BankResult<PaymentSession> {
        validate_session_id(session_id)?;

        self.with_retries("cancel_payment_session", move || async move {
            let now = self.now();
            let mut uow = self.store.begin().await?;
            let mut session = owned_session(&mut *uow, session_id, user_id).await?;

            if session.is_expired(now) {
                session.transition(SessionStatus::Expired, now)?;
                uow.update_session(&session).await?;
                uow.commit().await?;
                return Err(BankError::SessionNotCancellable {
                    session_id: session_id.to_string(),
                    status: SessionStatus::Expired,
                });
            }

            if session.status != SessionStatus::Pending {
                return Err(BankError::SessionNotCancellable {
                    session_id: session_id.to_string(),
                    status: session.status,
                });
            }

            session.transition(SessionStatus::Cancelled, now)?;
            uow.update_session(&session).await?;
            uow.commit().await?;

            info!(session_id, "Payment session cancelled");
            Ok(session)
        })
        .await
    }

    /// Reads a session, marking it expired if its TTL has passed.
    pub async fn get_payment_session(&self, session_id: &str, user_id: Uuid) -> BankResult<PaymentSession> {
        validate_session_id(session_id)?;

        self.with_retries("get_payment_session", move || async move {
            let now = self.now();
            let mut uow = self.store.begin().await?;
            let mut session = owned_session(&mut *uow, session_id, user_id).await?;

            if session.is_expired(now) {
                session.transition(SessionStatus::Expired, now)?;
                uow.update_session(&session).await?;
                uow.commit().await?;
            }

            Ok(session)
        })
        .await
    }

    /// Bulk-expires pending sessions past their TTL. Safe to run concurrently.
    pub async fn expire_stale_sessions(&self) -> BankResult<u64> {
        let expired = self
            .with_retries("expire_stale_sessions", move || async move {
                let now = self.now();
                let mut uow = self.store.begin().await?;
                let expired = uow.expire_sessions(now).await?;
                uow.commit().await?;
                Ok(expired)
            })
            .await?;

        if expired > 0 {
            info!(expired, "Expired stale payment sessions");
        }
        Ok(expired)
    }
}

/// Row-id fast path, falling back to the session id.
async fn locate_session(uow: &mut dyn UnitOfWork, request: &SettleRequest) -> BankResult<PaymentSession> {
    if let Some(row_id) = request.session_row_id {
        let by_row = uow
            .lock_session_by_row_id(row_id)
            .await?
            .filter(|session| session.session_id == request.session_id);
        if let Some(session) = by_row {
            return Ok(session);
        }
        warn!(session_row_id = %row_id, "Session row id did not match, falling back to session id");
    }

    uow.lock_session(&request.session_id)
        .await?
        .ok_or_else(|| BankError::NoPendingSession(request.session_id.clone()))
}

async fn owned_session(uow: &mut dyn UnitOfWork, session_id: &str, user_id: Uuid) -> BankResult<PaymentSession> {
    uow.lock_session(session_id)
        .await?
        .filter(|session| session.user_id == user_id)
        .ok_or_else(|| BankError::NoPendingSession(session_id.to_string()))
}

/// Ledger row for a session settlement or block. Carries the session id.
fn session_record(
    session: &PaymentSession,
    account: &Account,
    balance_after: &BigDecimal,
    status: TransactionStatus,
    description: &str,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction::new(
        account.owner_id,
        account.id,
        TransactionKind::Payment,
        &session.amount,
        balance_after.clone(),
        status,
        description,
        now,
    )
    .with_counterparty(session.merchant_name.clone(), None)
    .with_session(
        session.session_id.clone(),
        session.merchant_domain.clone(),
        session.order_id.clone(),
    )
}

/// Appends the ledger row, links it to the session and moves the session to `status`.
async fn close_session(
    mut uow: Box<dyn UnitOfWork>,
    session: &mut PaymentSession,
    record: &Transaction,
    status: SessionStatus,
    now: DateTime<Utc>,
) -> BankResult<()> {
    ledger::append(&mut *uow, record).await?;
    session.transaction_id = Some(record.id);
    session.transition(status, now)?;
    uow.update_session(session).await?;
    uow.commit().await?;
    Ok(())
}
