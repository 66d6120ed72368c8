//! Transaction domain entity.
//! One ledger row per side of a money movement, plus audit rows for denied attempts.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{BlacklistRisk, FraudVerdict, ParseEnumError, Recommendation, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
    Payment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
            TransactionKind::Payment => "payment",
        }
    }

    /// Whether money leaves the owner's account for this kind.
    pub fn is_outgoing(&self) -> bool {
        matches!(
            self,
            TransactionKind::Withdrawal | TransactionKind::TransferOut | TransactionKind::Payment
        )
    }

    /// Applies the owner-perspective sign to an absolute amount.
    pub fn signed(&self, amount: &BigDecimal) -> BigDecimal {
        if self.is_outgoing() {
            -amount.clone()
        } else {
            amount.clone()
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "transfer_out" => Ok(TransactionKind::TransferOut),
            "transfer_in" => Ok(TransactionKind::TransferIn),
            "payment" => Ok(TransactionKind::Payment),
            other => Err(ParseEnumError::new("transaction kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Money moved, awaiting manual fraud review.
    Pending,
    Completed,
    Failed,
    Blocked,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Blocked => "blocked",
            TransactionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "blocked" => Ok(TransactionStatus::Blocked),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(ParseEnumError::new("transaction status", other)),
        }
    }
}

/// Scorer verdict as recorded on the ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudMeta {
    pub is_fraud: bool,
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub recommendation: Recommendation,
    pub degraded: bool,
}

impl From<&FraudVerdict> for FraudMeta {
    fn from(verdict: &FraudVerdict) -> Self {
        Self {
            is_fraud: verdict.is_fraud,
            probability: verdict.probability,
            risk_level: verdict.risk_level,
            reasons: verdict.reasons.clone(),
            recommendation: verdict.effective_recommendation(),
            degraded: verdict.degraded,
        }
    }
}

/// Blacklist hit as recorded on the ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainBlockMeta {
    pub domain: String,
    pub merchant_name: String,
    pub reason: String,
    pub risk_level: BlacklistRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_id: Uuid,
    pub kind: TransactionKind,
    /// Signed from the owner's perspective.
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub status: TransactionStatus,
    pub description: String,
    /// Account number or merchant name of the other party.
    pub counterparty_ref: Option<String>,
    pub counterparty_account_id: Option<Uuid>,
    /// The opposite side of a transfer.
    pub linked_transaction_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub merchant_domain: Option<String>,
    pub order_id: Option<String>,
    pub fraud: Option<FraudMeta>,
    pub domain_block: Option<DomainBlockMeta>,
    pub block_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: Uuid,
        account_id: Uuid,
        kind: TransactionKind,
        amount: &BigDecimal,
        balance_after: BigDecimal,
        status: TransactionStatus,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            account_id,
            kind,
            amount: kind.signed(amount),
            balance_after,
            status,
            description: description.into(),
            counterparty_ref: None,
            counterparty_account_id: None,
            linked_transaction_id: None,
            session_id: None,
            merchant_domain: None,
            order_id: None,
            fraud: None,
            domain_block: None,
            block_reason: None,
            created_at: now,
            completed_at: (status == TransactionStatus::Completed).then_some(now),
        }
    }

    pub fn with_counterparty(mut self, reference: impl Into<String>, account_id: Option<Uuid>) -> Self {
        self.counterparty_ref = Some(reference.into());
        self.counterparty_account_id = account_id;
        self
    }

    pub fn with_session(
        mut self,
        session_id: impl Into<String>,
        merchant_domain: impl Into<String>,
        order_id: impl Into<String>,
    ) -> Self {
        self.session_id = Some(session_id.into());
        self.merchant_domain = Some(merchant_domain.into());
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_fraud(mut self, verdict: &FraudVerdict) -> Self {
        self.fraud = Some(FraudMeta::from(verdict));
        self
    }

    pub fn with_domain_block(mut self, meta: DomainBlockMeta) -> Self {
        self.domain_block = Some(meta);
        self
    }

    pub fn with_block_reason(mut self, reason: impl Into<String>) -> Self {
        self.block_reason = Some(reason.into());
        self
    }

    /// Absolute amount of the movement.
    pub fn magnitude(&self) -> BigDecimal {
        self.amount.abs()
    }

    /// Money moved but a reviewer still has to confirm it.
    pub fn is_under_review(&self) -> bool {
        self.status == TransactionStatus::Pending && self.fraud.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_kinds_are_recorded_negative() {
        let now = Utc::now();
        let amount = BigDecimal::from(25);
        let tx = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TransactionKind::TransferOut,
            &amount,
            BigDecimal::from(75),
            TransactionStatus::Completed,
            "Transfer",
            now,
        );

        assert_eq!(tx.amount, BigDecimal::from(-25));
        assert_eq!(tx.magnitude(), amount);
        assert_eq!(tx.completed_at, Some(now));
    }

    #[test]
    fn blocked_rows_have_no_completion_time() {
        let tx = Transaction::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TransactionKind::Deposit,
            &BigDecimal::from(10),
            BigDecimal::from(0),
            TransactionStatus::Blocked,
            "Blocked deposit",
            Utc::now(),
        );

        assert_eq!(tx.amount, BigDecimal::from(10));
        assert!(tx.completed_at.is_none());
        assert!(!tx.is_under_review());
    }

    #[test]
    fn kind_strings_match_column_values() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::TransferOut,
            TransactionKind::TransferIn,
            TransactionKind::Payment,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}
