//! Client side of the external fraud-scoring model.

pub mod client;
pub mod features;

pub use client::HttpFraudScorer;
pub use features::{age_on, infer_merchant_group, MerchantGroup, ScorerRequest};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{FraudVerdict, Recommendation, RiskLevel};

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Scorer timed out")]
    Timeout,
    #[error("Invalid response from scorer: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

/// Body returned by `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerResponse {
    pub is_fraud: bool,
    pub fraud_probability: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default = "default_recommendation")]
    pub recommendation: Recommendation,
}

fn default_recommendation() -> Recommendation {
    Recommendation::Approve
}

impl ScorerResponse {
    pub fn into_verdict(self) -> Result<FraudVerdict, ScorerError> {
        if !(0.0..=1.0).contains(&self.fraud_probability) {
            return Err(ScorerError::InvalidResponse(format!(
                "fraud_probability {} outside [0, 1]",
                self.fraud_probability
            )));
        }

        Ok(FraudVerdict {
            domain_blocked: false,
            is_fraud: self.is_fraud,
            risk_level: self.risk_level,
            probability: self.fraud_probability,
            reasons: self.reasons,
            recommendation: self.recommendation,
            degraded: false,
        })
    }
}
