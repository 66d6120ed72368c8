//! Resolution of transactions the fraud gate left `pending` for review.
//!
//! Approving only flips the status. Rejecting returns the money: a payment is
//! credited back to the payer, a transfer is reversed between both accounts.
//! The returned money is booked as new completed rows; the rejected rows keep
//! their original snapshot and are marked `failed`.

use tracing::{info, instrument};
use uuid::Uuid;

use super::ledger;
use super::orchestrator::BankingService;
use crate::domain::{Transaction, TransactionKind, TransactionStatus};
use crate::error::{BankError, BankResult};
use crate::ports::UnitOfWork;

pub const REJECTED_REASON: &str = "Rejected in fraud review";

impl BankingService {
    #[instrument(skip(self))]
    pub async fn approve_review(&self, transaction_id: Uuid) -> BankResult<Transaction> {
        self.with_retries("approve_review", move || async move {
            let now = self.now();
            let mut uow = self.store.begin().await?;
            let mut tx = reviewable(&mut *uow, transaction_id).await?;

            tx.status = TransactionStatus::Completed;
            tx.completed_at = Some(now);
            uow.update_transaction(&tx).await?;

            if let Some(mut linked) = linked(&mut *uow, &tx).await? {
                linked.status = TransactionStatus::Completed;
                linked.completed_at = Some(now);
                uow.update_transaction(&linked).await?;
            }

            uow.commit().await?;
            info!(transaction_id = %tx.id, "Review approved");
            Ok(tx)
        })
        .await
    }

    /// Reverses the money movement and records it as completed compensating
    /// rows, so balance snapshots keep reconciling with history. A transfer
    /// whose recipient already spent the funds cannot be reversed and fails
    /// with `InsufficientFunds`.
    #[instrument(skip(self))]
    pub async fn reject_review(&self, transaction_id: Uuid) -> BankResult<Transaction> {
        self.with_retries("reject_review", move || async move {
            let now = self.now();
            let mut uow = self.store.begin().await?;
            let mut tx = reviewable(&mut *uow, transaction_id).await?;
            let amount = tx.magnitude();

            match tx.kind {
                TransactionKind::Payment | TransactionKind::Withdrawal => {
                    let balance = ledger::credit(&mut *uow, tx.account_id, &amount).await?;
                    let mut refund = Transaction::new(
                        tx.owner_id,
                        tx.account_id,
                        TransactionKind::Deposit,
                        &amount,
                        balance,
                        TransactionStatus::Completed,
                        format!("Refund: {}", tx.description),
                        now,
                    );
                    refund.counterparty_ref = tx.counterparty_ref.clone();
                    refund.linked_transaction_id = Some(tx.id);
                    ledger::append(&mut *uow, &refund).await?;
                }
                TransactionKind::TransferOut => {
                    let mut incoming = linked(&mut *uow, &tx)
                        .await?
                        .ok_or_else(|| BankError::Internal(format!("transfer {} has no incoming side", tx.id)))?;
                    let recipient_balance = ledger::debit(&mut *uow, incoming.account_id, &amount).await?;
                    let sender_balance = ledger::credit(&mut *uow, tx.account_id, &amount).await?;

                    let description = format!("Reversal: {}", tx.description);
                    let mut returned = Transaction::new(
                        tx.owner_id,
                        tx.account_id,
                        TransactionKind::TransferIn,
                        &amount,
                        sender_balance,
                        TransactionStatus::Completed,
                        description.clone(),
                        now,
                    );
                    returned.counterparty_ref = tx.counterparty_ref.clone();
                    returned.counterparty_account_id = Some(incoming.account_id);
                    let mut clawback = Transaction::new(
                        incoming.owner_id,
                        incoming.account_id,
                        TransactionKind::TransferOut,
                        &amount,
                        recipient_balance,
                        TransactionStatus::Completed,
                        description,
                        now,
                    );
                    clawback.counterparty_ref = incoming.counterparty_ref.clone();
                    clawback.counterparty_account_id = Some(tx.account_id);
                    returned.linked_transaction_id = Some(clawback.id);
                    clawback.linked_transaction_id = Some(returned.id);

                    ledger::append(&mut *uow, &returned).await?;
                    ledger::append(&mut *uow, &clawback).await?;

                    incoming.status = TransactionStatus::Failed;
                    incoming.block_reason = Some(REJECTED_REASON.to_string());
                    uow.update_transaction(&incoming).await?;
                }
                TransactionKind::Deposit | TransactionKind::TransferIn => {
                    return Err(BankError::NotUnderReview(tx.id));
                }
            }

            tx.status = TransactionStatus::Failed;
            tx.block_reason = Some(REJECTED_REASON.to_string());
            uow.update_transaction(&tx).await?;
            uow.commit().await?;

            info!(transaction_id = %tx.id, amount = %amount, "Review rejected, funds returned");
            Ok(tx)
        })
        .await
    }
}

async fn reviewable(uow: &mut dyn UnitOfWork, transaction_id: Uuid) -> BankResult<Transaction> {
    let tx = uow
        .lock_transaction(transaction_id)
        .await?
        .ok_or(BankError::TransactionNotFound(transaction_id))?;

    if !tx.is_under_review() {
        return Err(BankError::NotUnderReview(transaction_id));
    }
    Ok(tx)
}

async fn linked(uow: &mut dyn UnitOfWork, tx: &Transaction) -> BankResult<Option<Transaction>> {
    match tx.linked_transaction_id {
        Some(id) => Ok(uow.lock_transaction(id).await?),
        None => Ok(None),
    }
}
