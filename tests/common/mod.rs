#![allow(dead_code)]

use async_trait::async_trait;
use banking_core::adapters::InMemoryLedgerStore;
use banking_core::clock::ManualClock;
use banking_core::domain::{Gender, RiskLevel, Recommendation, UserProfile};
use banking_core::ports::FraudScorer;
use banking_core::scorer::{ScorerError, ScorerRequest, ScorerResponse};
use banking_core::services::{BankingService, ServiceSettings};
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn low_risk() -> ScorerResponse {
    ScorerResponse {
        is_fraud: false,
        fraud_probability: 0.05,
        risk_level: RiskLevel::Low,
        reasons: vec![],
        recommendation: Recommendation::Approve,
    }
}

pub fn medium_risk() -> ScorerResponse {
    ScorerResponse {
        is_fraud: false,
        fraud_probability: 0.45,
        risk_level: RiskLevel::Medium,
        reasons: vec!["Unusual amount for this merchant group".to_string()],
        recommendation: Recommendation::Review,
    }
}

pub fn high_risk(reasons: &[&str]) -> ScorerResponse {
    ScorerResponse {
        is_fraud: true,
        fraud_probability: 0.93,
        risk_level: RiskLevel::High,
        reasons: reasons.iter().map(|r| r.to_string()).collect(),
        recommendation: Recommendation::Block,
    }
}

/// Scorer whose answer is set by the test. `None` makes every call fail.
pub struct StubScorer {
    response: Mutex<Option<ScorerResponse>>,
    calls: AtomicUsize,
}

impl StubScorer {
    pub fn approving() -> Self {
        Self {
            response: Mutex::new(Some(low_risk())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn respond_with(&self, response: ScorerResponse) {
        *self.response.lock().unwrap() = Some(response);
    }

    pub fn fail(&self) {
        *self.response.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FraudScorer for StubScorer {
    async fn score(&self, _request: &ScorerRequest) -> Result<ScorerResponse, ScorerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().unwrap().clone().ok_or(ScorerError::Timeout)
    }
}

pub struct Harness {
    pub service: BankingService,
    pub scorer: Arc<StubScorer>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let scorer = Arc::new(StubScorer::approving());
        let clock = ManualClock::new(start_time());
        let service = BankingService::new(
            Arc::new(InMemoryLedgerStore::with_clock(Arc::new(clock.clone()))),
            scorer.clone(),
            Arc::new(clock.clone()),
            settings,
        );
        Self {
            service,
            scorer,
            clock,
        }
    }

    /// Opens a user with a primary account and returns the user id.
    pub async fn open(&self, first_name: &str, account_number: &str, balance: &str) -> Uuid {
        let profile = UserProfile::new(first_name, "Tester", Gender::Female, None);
        let user_id = profile.id;
        self.service
            .open_account(profile, account_number, dec(balance))
            .await
            .unwrap();
        user_id
    }

    pub async fn balance(&self, user_id: Uuid) -> BigDecimal {
        self.service.primary_account(user_id).await.unwrap().balance
    }
}
