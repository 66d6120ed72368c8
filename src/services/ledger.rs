//! Ledger operations as seen by the orchestrator: storage results lifted into
//! business errors. All calls run inside the caller's unit of work.

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::domain::Transaction;
use crate::error::{BankError, BankResult};
use crate::ports::{AccountRepository, TransactionRepository};

/// Fails with `InsufficientFunds` instead of letting the balance go negative.
pub async fn debit<R>(repo: &mut R, account_id: Uuid, amount: &BigDecimal) -> BankResult<BigDecimal>
where
    R: AccountRepository + ?Sized,
{
    repo.debit(account_id, amount)
        .await?
        .ok_or(BankError::InsufficientFunds)
}

pub async fn credit<R>(repo: &mut R, account_id: Uuid, amount: &BigDecimal) -> BankResult<BigDecimal>
where
    R: AccountRepository + ?Sized,
{
    Ok(repo.credit(account_id, amount).await?)
}

pub async fn append<R>(repo: &mut R, tx: &Transaction) -> BankResult<Uuid>
where
    R: TransactionRepository + ?Sized,
{
    Ok(repo.append_transaction(tx).await?)
}
