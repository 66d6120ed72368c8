//! Merchant payment sessions.
//! A session maps one external session identifier to at most one settled ledger row.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    Blocked,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Blocked => "blocked",
            SessionStatus::Expired => "expired",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    /// Validates a one-way transition out of `Pending`.
    pub fn transition_to(self, next: SessionStatus) -> Result<SessionStatus, SessionTransitionError> {
        match (self, next) {
            (SessionStatus::Pending, SessionStatus::Completed)
            | (SessionStatus::Pending, SessionStatus::Blocked)
            | (SessionStatus::Pending, SessionStatus::Expired)
            | (SessionStatus::Pending, SessionStatus::Cancelled) => Ok(next),
            (from, to) => Err(SessionTransitionError { from, to }),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "completed" => Ok(SessionStatus::Completed),
            "blocked" => Ok(SessionStatus::Blocked),
            "expired" => Ok(SessionStatus::Expired),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal payment session transition {from} -> {to}")]
pub struct SessionTransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// Merchant descriptor as supplied by the redirecting website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    pub name: String,
    pub url: String,
}

impl Merchant {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: Uuid,
    pub merchant_name: String,
    pub merchant_url: String,
    pub merchant_domain: String,
    pub amount: BigDecimal,
    pub order_id: String,
    pub description: Option<String>,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ledger row that settled (or blocked) this session.
    pub transaction_id: Option<Uuid>,
}

impl PaymentSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        user_id: Uuid,
        merchant: &Merchant,
        merchant_domain: impl Into<String>,
        amount: BigDecimal,
        order_id: impl Into<String>,
        description: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id,
            merchant_name: merchant.name.clone(),
            merchant_url: merchant.url.clone(),
            merchant_domain: merchant_domain.into(),
            amount,
            order_id: order_id.into(),
            description,
            status: SessionStatus::Pending,
            expires_at: now + ttl,
            created_at: now,
            completed_at: None,
            transaction_id: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Pending && now > self.expires_at
    }

    pub fn transition(
        &mut self,
        next: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), SessionTransitionError> {
        self.status = self.status.transition_to(next)?;
        if self.status == SessionStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(now: DateTime<Utc>) -> PaymentSession {
        PaymentSession::new(
            "PAY_1",
            Uuid::new_v4(),
            &Merchant::new("Shop", "https://shop.example.com"),
            "shop.example.com",
            BigDecimal::from(42),
            "ORDER-1",
            None,
            now,
            Duration::minutes(15),
        )
    }

    #[test]
    fn pending_moves_to_any_terminal_state_once() {
        let now = Utc::now();
        let mut s = session(now);
        s.transition(SessionStatus::Completed, now).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.completed_at, Some(now));

        let err = s.transition(SessionStatus::Cancelled, now).unwrap_err();
        assert_eq!(err.from, SessionStatus::Completed);
        assert_eq!(s.status, SessionStatus::Completed);
    }

    #[test]
    fn pending_cannot_transition_to_pending() {
        assert!(SessionStatus::Pending
            .transition_to(SessionStatus::Pending)
            .is_err());
    }

    #[test]
    fn expiry_only_applies_to_pending_sessions() {
        let now = Utc::now();
        let mut s = session(now);
        assert!(!s.is_expired(now + Duration::minutes(15)));
        assert!(s.is_expired(now + Duration::minutes(16)));

        s.transition(SessionStatus::Cancelled, now).unwrap();
        assert!(s.completed_at.is_none());
        assert!(!s.is_expired(now + Duration::minutes(16)));
    }
}
