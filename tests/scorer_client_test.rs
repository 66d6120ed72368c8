use banking_core::domain::{Gender, RiskLevel, Recommendation, SenderProfile};
use banking_core::ports::FraudScorer;
use banking_core::scorer::{HttpFraudScorer, ScorerError, ScorerRequest};
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use std::time::Duration;

fn request() -> ScorerRequest {
    let sender = SenderProfile {
        gender: Gender::Female,
        date_of_birth: None,
        bank: "HSBC".to_string(),
        country: "United Kingdom".to_string(),
        shipping_address: "United Kingdom".to_string(),
    };
    ScorerRequest::build(
        &BigDecimal::from(250),
        "Online electronics order",
        &sender,
        Utc.with_ymd_and_hms(2024, 5, 1, 22, 15, 0).unwrap(),
    )
}

#[tokio::test]
async fn test_predict_parses_verdict() {
    let mut server = mockito::Server::new_async().await;

    let mock_response = r#"{
        "is_fraud": true,
        "fraud_probability": 0.81,
        "risk_level": "high",
        "reasons": ["Late-night online purchase"],
        "recommendation": "BLOCK"
    }"#;

    let mock = server
        .mock("POST", "/predict")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"Amount": 250.0, "Time": 22, "Bank": "HSBC"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(mock_response)
        .create_async()
        .await;

    let client = HttpFraudScorer::new(server.url(), Duration::from_secs(5));
    let response = client.score(&request()).await.unwrap();

    mock.assert_async().await;
    assert!(response.is_fraud);
    assert_eq!(response.risk_level, RiskLevel::High);
    assert_eq!(response.recommendation, Recommendation::Block);
    assert_eq!(response.reasons, vec!["Late-night online purchase"]);
}

#[tokio::test]
async fn test_missing_recommendation_defaults_to_approve() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/predict")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"is_fraud": false, "fraud_probability": 0.1, "risk_level": "low"}"#)
        .create_async()
        .await;

    let client = HttpFraudScorer::new(server.url(), Duration::from_secs(5));
    let response = client.score(&request()).await.unwrap();

    assert_eq!(response.recommendation, Recommendation::Approve);
    assert!(response.reasons.is_empty());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/predict")
        .with_status(500)
        .create_async()
        .await;

    let client = HttpFraudScorer::new(server.url(), Duration::from_secs(5));
    let result = client.score(&request()).await;

    assert!(matches!(result, Err(ScorerError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_malformed_body_is_reported() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/predict")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"verdict": "maybe"}"#)
        .create_async()
        .await;

    let client = HttpFraudScorer::new(server.url(), Duration::from_secs(5));
    let result = client.score(&request()).await;

    assert!(matches!(result, Err(ScorerError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_circuit_breaker_opens_after_failures() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/predict")
        .with_status(500)
        .expect_at_least(3)
        .create_async()
        .await;

    let client = HttpFraudScorer::with_circuit_breaker(server.url(), Duration::from_secs(5), 3, 30);

    for _ in 0..3 {
        let _ = client.score(&request()).await;
    }

    let result = client.score(&request()).await;
    assert!(matches!(result, Err(ScorerError::CircuitBreakerOpen(_))));
    assert_eq!(client.circuit_state(), "open");
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"model_loaded": true}"#)
        .create_async()
        .await;

    let client = HttpFraudScorer::new(server.url(), Duration::from_secs(5));
    let health = client.health().await;

    assert!(health.healthy);
    assert_eq!(health.model_loaded, Some(true));
}

#[tokio::test]
async fn test_health_of_unreachable_scorer() {
    let client = HttpFraudScorer::new("http://127.0.0.1:9".to_string(), Duration::from_millis(200));
    let health = client.health().await;

    assert!(!health.healthy);
    assert!(health.error.is_some());
}
