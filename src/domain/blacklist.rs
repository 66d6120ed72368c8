//! Merchant-domain blacklist entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl BlacklistRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistRisk::Low => "low",
            BlacklistRisk::Medium => "medium",
            BlacklistRisk::High => "high",
            BlacklistRisk::Critical => "critical",
        }
    }
}

impl Default for BlacklistRisk {
    fn default() -> Self {
        BlacklistRisk::High
    }
}

impl fmt::Display for BlacklistRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistRisk {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(BlacklistRisk::Low),
            "medium" => Ok(BlacklistRisk::Medium),
            "high" => Ok(BlacklistRisk::High),
            "critical" => Ok(BlacklistRisk::Critical),
            other => Err(ParseEnumError::new("blacklist risk", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: Uuid,
    /// Normalized bare hostname, e.g. `shop.example.com`.
    pub domain: String,
    pub merchant_name: String,
    pub reason: String,
    pub risk_level: BlacklistRisk,
    pub reported_by: String,
    pub is_active: bool,
    pub blocked_transactions: i64,
    pub created_at: DateTime<Utc>,
}

impl BlacklistEntry {
    pub fn new(
        domain: impl Into<String>,
        merchant_name: impl Into<String>,
        reason: impl Into<String>,
        risk_level: BlacklistRisk,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            merchant_name: merchant_name.into(),
            reason: reason.into(),
            risk_level,
            reported_by: "System".to_string(),
            is_active: true,
            blocked_transactions: 0,
            created_at: Utc::now(),
        }
    }
}
