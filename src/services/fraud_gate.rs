//! Merchant-domain blacklist plus the external risk scorer.
//!
//! The gate proposes a verdict. What happens to the money is decided by the
//! orchestrator from `FraudVerdict::decision`.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::domain::{BlacklistEntry, DomainBlockMeta, FraudVerdict, SenderProfile};
use crate::policy::FailurePolicy;
use crate::ports::{BlacklistRepository, FraudScorer, StoreResult};
use crate::scorer::{ScorerError, ScorerRequest};

/// Bare lowercase hostname without scheme, port, path or a leading `www.`.
pub fn normalize_domain(merchant_url: &str) -> String {
    let trimmed = merchant_url.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let host = Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| {
            trimmed
                .split("://")
                .last()
                .unwrap_or(trimmed)
                .split(['/', '?', '#', ':'])
                .next()
                .unwrap_or(trimmed)
                .to_string()
        })
        .to_lowercase();

    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainCheck {
    Clear { domain: String },
    Blocked { entry: BlacklistEntry, hits: i64 },
}

impl DomainCheck {
    pub fn domain(&self) -> &str {
        match self {
            DomainCheck::Clear { domain } => domain,
            DomainCheck::Blocked { entry, .. } => &entry.domain,
        }
    }

    pub fn block_meta(&self) -> Option<DomainBlockMeta> {
        match self {
            DomainCheck::Clear { .. } => None,
            DomainCheck::Blocked { entry, .. } => Some(DomainBlockMeta {
                domain: entry.domain.clone(),
                merchant_name: entry.merchant_name.clone(),
                reason: entry.reason.clone(),
                risk_level: entry.risk_level,
            }),
        }
    }

    pub fn verdict(&self) -> Option<FraudVerdict> {
        match self {
            DomainCheck::Clear { .. } => None,
            DomainCheck::Blocked { entry, .. } => Some(FraudVerdict::domain_blocked(format!(
                "Merchant domain {} is blacklisted: {}",
                entry.domain, entry.reason
            ))),
        }
    }
}

#[derive(Clone)]
pub struct FraudGate {
    scorer: Arc<dyn FraudScorer>,
    policy: FailurePolicy,
}

impl FraudGate {
    pub fn new(scorer: Arc<dyn FraudScorer>, policy: FailurePolicy) -> Self {
        Self { scorer, policy }
    }

    /// Looks the merchant up in the active blacklist and counts the hit.
    /// Runs inside the caller's unit of work so the counter commits with the audit row.
    pub async fn check_domain<R>(&self, repo: &mut R, merchant_url: &str) -> StoreResult<DomainCheck>
    where
        R: BlacklistRepository + ?Sized,
    {
        let domain = normalize_domain(merchant_url);

        match repo.find_active_entry(&domain).await? {
            Some(mut entry) => {
                let hits = repo.record_blacklist_hit(entry.id).await?;
                entry.blocked_transactions = hits;
                warn!(
                    domain = %domain,
                    merchant = %entry.merchant_name,
                    risk = %entry.risk_level,
                    hits = hits,
                    "Blacklisted merchant domain"
                );
                Ok(DomainCheck::Blocked { entry, hits })
            }
            None => Ok(DomainCheck::Clear { domain }),
        }
    }

    /// Asks the scorer for a verdict. Under fail-open, scorer failures become
    /// an approving verdict marked `degraded`.
    pub async fn score(
        &self,
        amount: &BigDecimal,
        description: &str,
        sender: &SenderProfile,
        now: DateTime<Utc>,
    ) -> Result<FraudVerdict, ScorerError> {
        let request = ScorerRequest::build(amount, description, sender, now);

        let result = match self.scorer.score(&request).await {
            Ok(response) => response.into_verdict(),
            Err(e) => Err(e),
        };

        match result {
            Ok(verdict) => {
                info!(
                    risk = %verdict.risk_level,
                    probability = verdict.probability,
                    recommendation = %verdict.recommendation,
                    "Fraud verdict received"
                );
                Ok(verdict)
            }
            Err(e) if self.policy.fails_open() => {
                warn!(degraded = true, error = %e, "Fraud scorer unavailable, approving");
                Ok(FraudVerdict::unavailable())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FraudDecision, Gender, Recommendation, RiskLevel};
    use crate::scorer::ScorerResponse;
    use async_trait::async_trait;
    use std::str::FromStr;

    #[test]
    fn normalizes_merchant_urls() {
        assert_eq!(normalize_domain("https://www.Shop.Example.com/cart?id=1"), "shop.example.com");
        assert_eq!(normalize_domain("http://shop.example.com:8080"), "shop.example.com");
        assert_eq!(normalize_domain("WWW.scam-store.net"), "scam-store.net");
        assert_eq!(normalize_domain("scam-store.net/path"), "scam-store.net");
        assert_eq!(normalize_domain("  shop.example.com  "), "shop.example.com");
    }

    struct FixedScorer(Option<ScorerResponse>);

    #[async_trait]
    impl FraudScorer for FixedScorer {
        async fn score(&self, _request: &ScorerRequest) -> Result<ScorerResponse, ScorerError> {
            self.0.clone().ok_or(ScorerError::Timeout)
        }
    }

    fn sender() -> SenderProfile {
        SenderProfile {
            gender: Gender::Male,
            date_of_birth: None,
            bank: "HSBC".to_string(),
            country: "United Kingdom".to_string(),
            shipping_address: "United Kingdom".to_string(),
        }
    }

    #[tokio::test]
    async fn scorer_failure_fails_open() {
        let gate = FraudGate::new(Arc::new(FixedScorer(None)), FailurePolicy::FailOpen);
        let verdict = gate
            .score(&BigDecimal::from(50), "lunch", &sender(), Utc::now())
            .await
            .unwrap();

        assert!(verdict.degraded);
        assert!(!verdict.is_fraud);
        assert_eq!(verdict.recommendation, Recommendation::Approve);
        assert_eq!(verdict.decision(), FraudDecision::Approve);
        assert_eq!(verdict.primary_reason(), Some(FraudVerdict::UNAVAILABLE_REASON));
    }

    #[tokio::test]
    async fn scorer_failure_propagates_when_fail_closed() {
        let gate = FraudGate::new(
            Arc::new(FixedScorer(None)),
            FailurePolicy::FailClosed { max_retries: 0 },
        );
        let result = gate
            .score(&BigDecimal::from(50), "lunch", &sender(), Utc::now())
            .await;
        assert!(matches!(result, Err(ScorerError::Timeout)));
    }

    #[tokio::test]
    async fn out_of_range_probability_is_treated_as_failure() {
        let response = ScorerResponse {
            is_fraud: false,
            fraud_probability: 1.5,
            risk_level: RiskLevel::Low,
            reasons: vec![],
            recommendation: Recommendation::Approve,
        };
        let gate = FraudGate::new(Arc::new(FixedScorer(Some(response))), FailurePolicy::FailOpen);
        let verdict = gate
            .score(&BigDecimal::from_str("10.00").unwrap(), "", &sender(), Utc::now())
            .await
            .unwrap();
        assert!(verdict.degraded);
    }
}
