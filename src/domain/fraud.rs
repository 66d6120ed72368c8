//! Fraud verdicts and the policy that turns them into a decision.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Account, Gender, ParseEnumError, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    /// The scorer could not be consulted.
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "unknown" => Ok(RiskLevel::Unknown),
            _ => Err(ParseEnumError::new("risk level", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Approve,
    Review,
    Block,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Approve => "APPROVE",
            Recommendation::Review => "REVIEW",
            Recommendation::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(Recommendation::Approve),
            "REVIEW" => Ok(Recommendation::Review),
            "BLOCK" => Ok(Recommendation::Block),
            _ => Err(ParseEnumError::new("recommendation", s)),
        }
    }
}

/// What the orchestrator does with a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudDecision {
    Approve,
    Review,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudVerdict {
    pub domain_blocked: bool,
    pub is_fraud: bool,
    pub risk_level: RiskLevel,
    pub probability: f64,
    pub reasons: Vec<String>,
    pub recommendation: Recommendation,
    /// Set when the verdict was synthesized because the scorer failed.
    pub degraded: bool,
}

impl FraudVerdict {
    pub const UNAVAILABLE_REASON: &'static str = "Fraud detection service unavailable";

    /// Verdict used when the scorer cannot be reached and its policy is fail-open.
    pub fn unavailable() -> Self {
        Self {
            domain_blocked: false,
            is_fraud: false,
            risk_level: RiskLevel::Unknown,
            probability: 0.0,
            reasons: vec![Self::UNAVAILABLE_REASON.to_string()],
            recommendation: Recommendation::Approve,
            degraded: true,
        }
    }

    pub fn domain_blocked(reason: impl Into<String>) -> Self {
        Self {
            domain_blocked: true,
            is_fraud: true,
            risk_level: RiskLevel::High,
            probability: 1.0,
            reasons: vec![reason.into()],
            recommendation: Recommendation::Block,
            degraded: false,
        }
    }

    pub fn decision(&self) -> FraudDecision {
        if self.domain_blocked
            || self.risk_level == RiskLevel::High
            || self.recommendation == Recommendation::Block
        {
            return FraudDecision::Block;
        }

        if self.risk_level == RiskLevel::Medium || self.recommendation == Recommendation::Review {
            return FraudDecision::Review;
        }

        FraudDecision::Approve
    }

    /// The recommendation recorded on the ledger row, aligned with the decision taken.
    pub fn effective_recommendation(&self) -> Recommendation {
        match self.decision() {
            FraudDecision::Approve => self.recommendation,
            FraudDecision::Review => Recommendation::Review,
            FraudDecision::Block => Recommendation::Block,
        }
    }

    pub fn primary_reason(&self) -> Option<&str> {
        self.reasons.first().map(String::as_str)
    }
}

/// Sender attributes fed into the scorer's feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub bank: String,
    pub country: String,
    pub shipping_address: String,
}

impl SenderProfile {
    pub fn from_parts(profile: &UserProfile, account: &Account) -> Self {
        let shipping_address = if account.shipping_address.trim().is_empty() {
            account.country.clone()
        } else {
            account.shipping_address.clone()
        };

        Self {
            gender: profile.gender,
            date_of_birth: profile.date_of_birth,
            bank: account.bank.clone(),
            country: account.country.clone(),
            shipping_address,
        }
    }
}
