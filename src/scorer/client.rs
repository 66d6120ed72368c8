use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ScorerError, ScorerRequest, ScorerResponse};
use crate::ports::FraudScorer;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Response from the scorer's `/health` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerHealth {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub model_loaded: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the fraud-scoring model
#[derive(Clone)]
pub struct HttpFraudScorer {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpFraudScorer {
    /// Creates a scorer client with a per-request timeout and the default circuit breaker
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, timeout, 5, 30)
    }

    /// Creates a scorer client with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpFraudScorer {
            client,
            base_url,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Probes `/health`. Never fails; an unreachable scorer reports unhealthy.
    pub async fn health(&self) -> ScorerHealth {
        let result = self
            .client
            .get(self.url("health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => match response.json::<ScorerHealth>().await {
                Ok(mut health) => {
                    health.healthy = true;
                    health
                }
                Err(_) => ScorerHealth {
                    healthy: true,
                    model_loaded: None,
                    error: None,
                },
            },
            Err(e) => ScorerHealth {
                healthy: false,
                model_loaded: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[async_trait]
impl FraudScorer for HttpFraudScorer {
    async fn score(&self, request: &ScorerRequest) -> Result<ScorerResponse, ScorerError> {
        let url = self.url("predict");
        let client = self.client.clone();
        let body = request.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.post(&url).json(&body).send().await.map_err(|e| {
                    if e.is_timeout() {
                        ScorerError::Timeout
                    } else {
                        ScorerError::RequestError(e)
                    }
                })?;

                if !response.status().is_success() {
                    return Err(ScorerError::InvalidResponse(format!(
                        "status {}",
                        response.status()
                    )));
                }

                response
                    .json::<ScorerResponse>()
                    .await
                    .map_err(|e| ScorerError::InvalidResponse(e.to_string()))
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(FailsafeError::Rejected) => Err(ScorerError::CircuitBreakerOpen(
                "fraud scorer circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}
