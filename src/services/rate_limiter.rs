//! Weighted sliding-window rate limiter with a cooldown block.
//!
//! The limiter never commits on its own. It reads and writes the user's
//! `RateLimitState` through the caller's unit of work, so the appended event
//! and the ledger write land in the same database transaction.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::RateLimitState;
use crate::policy::FailurePolicy;
use crate::ports::{RateLimitRepository, StoreResult};

pub const DEFAULT_HIGH_VALUE_THRESHOLD: i64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Amounts strictly above this count twice.
    pub high_value_threshold: BigDecimal,
    pub rapid_window: Duration,
    pub rapid_limit: u32,
    pub hourly_window: Duration,
    pub hourly_limit: u32,
    /// Risk scores strictly above this use the elevated limits.
    pub elevated_risk_threshold: f64,
    pub elevated_rapid_limit: u32,
    pub elevated_hourly_limit: u32,
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: BigDecimal::from(DEFAULT_HIGH_VALUE_THRESHOLD),
            rapid_window: Duration::minutes(5),
            rapid_limit: 3,
            hourly_window: Duration::minutes(60),
            hourly_limit: 10,
            elevated_risk_threshold: 0.7,
            elevated_rapid_limit: 2,
            elevated_hourly_limit: 7,
            block_duration: Duration::minutes(30),
        }
    }
}

impl RateLimitConfig {
    pub fn with_high_value_threshold(threshold: BigDecimal) -> Self {
        Self {
            high_value_threshold: threshold,
            ..Self::default()
        }
    }

    pub fn weight(&self, amount: &BigDecimal) -> u32 {
        if amount > &self.high_value_threshold {
            2
        } else {
            1
        }
    }

    fn limits(&self, risk_score: Option<f64>) -> (u32, u32) {
        match risk_score {
            Some(score) if score > self.elevated_risk_threshold => {
                (self.elevated_rapid_limit, self.elevated_hourly_limit)
            }
            _ => (self.rapid_limit, self.hourly_limit),
        }
    }
}

/// Why a request was refused and when the user may try again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDenial {
    pub reason: String,
    pub blocked_until: DateTime<Utc>,
    pub minutes_remaining: i64,
}

impl RateLimitDenial {
    fn from_state(state: &RateLimitState, now: DateTime<Utc>) -> Option<Self> {
        let blocked_until = state.blocked_until?;
        Some(Self {
            reason: state
                .block_reason
                .clone()
                .unwrap_or_else(|| "Too many transactions".to_string()),
            blocked_until,
            minutes_remaining: state.minutes_remaining(now),
        })
    }

    pub fn message(&self) -> String {
        format!(
            "{}. Please try again in {} minutes.",
            self.reason, self.minutes_remaining
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The event was recorded with this weight.
    Allowed { weight: u32 },
    Denied(RateLimitDenial),
    /// State could not be read or written; allowed without recording.
    Degraded,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateLimitDecision::Denied(_))
    }
}

/// Applies one request to the state. Pure; the caller persists the result.
pub fn evaluate(
    state: &mut RateLimitState,
    amount: &BigDecimal,
    risk_score: Option<f64>,
    now: DateTime<Utc>,
    config: &RateLimitConfig,
) -> RateLimitDecision {
    state.prune(now);
    state.clear_expired_block(now);

    if state.is_blocked(now) {
        if let Some(denial) = RateLimitDenial::from_state(state, now) {
            return RateLimitDecision::Denied(denial);
        }
    }

    let weight = config.weight(amount);
    let (rapid_limit, hourly_limit) = config.limits(risk_score);

    let rapid = state.weight_within(config.rapid_window, now);
    if rapid + weight > rapid_limit {
        let reason = format!(
            "Too many transactions in short time ({}/{} in {} minutes)",
            rapid,
            rapid_limit,
            config.rapid_window.num_minutes()
        );
        return deny(state, reason, now, config);
    }

    let hourly = state.weight_within(config.hourly_window, now);
    if hourly + weight > hourly_limit {
        let reason = format!(
            "Transaction limit exceeded ({}/{} per hour)",
            hourly, hourly_limit
        );
        return deny(state, reason, now, config);
    }

    state.record(weight, now);
    RateLimitDecision::Allowed { weight }
}

fn deny(
    state: &mut RateLimitState,
    reason: String,
    now: DateTime<Utc>,
    config: &RateLimitConfig,
) -> RateLimitDecision {
    let until = now + config.block_duration;
    state.block(until, reason.clone());
    RateLimitDecision::Denied(RateLimitDenial {
        reason,
        blocked_until: until,
        minutes_remaining: config.block_duration.num_minutes(),
    })
}

/// Read-only view for `getRateLimitStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub user_id: Uuid,
    pub is_blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub minutes_remaining: i64,
    pub rapid: WindowCount,
    pub hourly: WindowCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowCount {
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
}

impl WindowCount {
    fn new(current: u32, max: u32) -> Self {
        Self {
            current,
            max,
            remaining: max.saturating_sub(current),
        }
    }
}

/// Prunes and clears an expired block, then reports the windows.
pub fn snapshot(
    state: &mut RateLimitState,
    now: DateTime<Utc>,
    config: &RateLimitConfig,
) -> RateLimitStatus {
    state.prune(now);
    state.clear_expired_block(now);
    let is_blocked = state.is_blocked(now);

    RateLimitStatus {
        user_id: state.user_id,
        is_blocked,
        blocked_until: state.blocked_until,
        reason: state.block_reason.clone(),
        minutes_remaining: state.minutes_remaining(now),
        rapid: WindowCount::new(
            state.weight_within(config.rapid_window, now),
            config.rapid_limit,
        ),
        hourly: WindowCount::new(
            state.weight_within(config.hourly_window, now),
            config.hourly_limit,
        ),
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    policy: FailurePolicy,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, policy: FailurePolicy) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Evaluates and persists one request inside the caller's unit of work.
    ///
    /// State errors are rolled back to a checkpoint and, under a fail-open
    /// policy, answered with `Degraded` so the unit of work can continue.
    pub async fn check<R>(
        &self,
        repo: &mut R,
        user_id: Uuid,
        amount: &BigDecimal,
        risk_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision>
    where
        R: RateLimitRepository + ?Sized,
    {
        repo.checkpoint().await?;

        match self.try_check(repo, user_id, amount, risk_score, now).await {
            Ok(decision) => {
                match &decision {
                    RateLimitDecision::Denied(denial) => info!(
                        user_id = %user_id,
                        reason = %denial.reason,
                        blocked_until = %denial.blocked_until,
                        "Rate limit denied transaction"
                    ),
                    _ => debug!(user_id = %user_id, "Rate limit passed"),
                }
                Ok(decision)
            }
            Err(e) if self.policy.fails_open() => {
                warn!(
                    user_id = %user_id,
                    degraded = true,
                    error = %e,
                    "Rate limit state unavailable, allowing transaction"
                );
                repo.rollback_to_checkpoint().await?;
                Ok(RateLimitDecision::Degraded)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_check<R>(
        &self,
        repo: &mut R,
        user_id: Uuid,
        amount: &BigDecimal,
        risk_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision>
    where
        R: RateLimitRepository + ?Sized,
    {
        let mut state = repo.lock_rate_limit(user_id).await?;
        let decision = evaluate(&mut state, amount, risk_score, now, &self.config);
        repo.save_rate_limit(&state).await?;
        Ok(decision)
    }

    pub async fn status<R>(
        &self,
        repo: &mut R,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitStatus>
    where
        R: RateLimitRepository + ?Sized,
    {
        let mut state = repo.lock_rate_limit(user_id).await?;
        let status = snapshot(&mut state, now, &self.config);
        repo.save_rate_limit(&state).await?;
        Ok(status)
    }

    /// Lifts an active cooldown. Event history is kept. Returns whether a block was cleared.
    pub async fn clear_block<R>(&self, repo: &mut R, user_id: Uuid) -> StoreResult<bool>
    where
        R: RateLimitRepository + ?Sized,
    {
        let mut state = repo.lock_rate_limit(user_id).await?;
        let was_blocked = state.blocked_until.is_some();
        state.clear_block();
        repo.save_rate_limit(&state).await?;
        Ok(was_blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StoreError;
    use async_trait::async_trait;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn fourth_small_transaction_in_five_minutes_is_blocked() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let t0 = start();

        for minute in 0..3 {
            let decision = evaluate(&mut state, &dec("10"), None, t0 + Duration::minutes(minute * 2), &config);
            assert_eq!(decision, RateLimitDecision::Allowed { weight: 1 });
        }

        let now = t0 + Duration::minutes(4);
        match evaluate(&mut state, &dec("10"), None, now, &config) {
            RateLimitDecision::Denied(denial) => {
                assert!(denial.reason.contains("3/3 in 5 minutes"), "{}", denial.reason);
                assert_eq!(denial.blocked_until, now + Duration::minutes(30));
                assert_eq!(denial.minutes_remaining, 30);
            }
            other => panic!("expected denial, got {:?}", other),
        }
        // Rejected event is not recorded.
        assert_eq!(state.events.len(), 3);
    }

    #[test]
    fn high_value_transaction_counts_twice() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();

        assert_eq!(
            evaluate(&mut state, &dec("1500"), None, now, &config),
            RateLimitDecision::Allowed { weight: 2 }
        );
        assert_eq!(
            evaluate(&mut state, &dec("1000"), None, now, &config),
            RateLimitDecision::Allowed { weight: 1 }
        );
        let status = snapshot(&mut state, now, &config);
        assert_eq!(status.rapid.remaining, 0);
        assert!(!evaluate(&mut state, &dec("1"), None, now, &config).is_allowed());
    }

    #[test]
    fn blocks_exactly_at_the_threshold_crossing() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let t0 = start();

        // Spread so the rapid window never fills: one event every 6 minutes.
        for i in 0..10 {
            let decision = evaluate(&mut state, &dec("5"), None, t0 + Duration::minutes(i * 6), &config);
            assert!(decision.is_allowed(), "event {} should pass", i);
        }

        match evaluate(&mut state, &dec("5"), None, t0 + Duration::minutes(59), &config) {
            RateLimitDecision::Denied(denial) => {
                assert_eq!(denial.reason, "Transaction limit exceeded (10/10 per hour)");
            }
            other => panic!("expected hourly denial, got {:?}", other),
        }
    }

    #[test]
    fn rapid_window_is_checked_before_hourly() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();
        for i in 0..7 {
            state.record(1, now - Duration::minutes(50 - i));
        }
        state.record(3, now - Duration::minutes(1));

        match evaluate(&mut state, &dec("1"), None, now, &config) {
            RateLimitDecision::Denied(denial) => assert!(denial.reason.starts_with("Too many")),
            other => panic!("expected rapid denial, got {:?}", other),
        }
    }

    #[test]
    fn active_block_rejects_without_reevaluating() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();
        state.block(now + Duration::minutes(10), "Too many transactions in short time (3/3 in 5 minutes)");

        match evaluate(&mut state, &dec("1"), None, now, &config) {
            RateLimitDecision::Denied(denial) => {
                assert_eq!(denial.minutes_remaining, 10);
                assert!(denial.reason.contains("3/3"));
            }
            other => panic!("expected denial, got {:?}", other),
        }
        assert!(state.events.is_empty());
    }

    #[test]
    fn expired_block_is_cleared_lazily() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();
        state.block(now, "old");

        assert!(evaluate(&mut state, &dec("1"), None, now, &config).is_allowed());
        assert!(state.blocked_until.is_none());
        assert!(state.block_reason.is_none());
    }

    #[test]
    fn elevated_risk_tightens_limits_for_one_evaluation() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();
        state.record(1, now - Duration::minutes(2));
        state.record(1, now - Duration::minutes(1));

        let mut risky = state.clone();
        assert!(!evaluate(&mut risky, &dec("1"), Some(0.71), now, &config).is_allowed());
        assert!(evaluate(&mut state, &dec("1"), Some(0.7), now, &config).is_allowed());
    }

    #[test]
    fn events_older_than_an_hour_never_count() {
        let config = RateLimitConfig::default();
        let mut state = RateLimitState::new(Uuid::new_v4());
        let now = start();
        for _ in 0..10 {
            state.record(1, now - Duration::minutes(60));
        }

        assert!(evaluate(&mut state, &dec("1"), None, now, &config).is_allowed());
        assert_eq!(state.events.len(), 1);
    }

    struct BrokenRepo {
        rolled_back: bool,
    }

    #[async_trait]
    impl RateLimitRepository for BrokenRepo {
        async fn lock_rate_limit(&mut self, _user_id: Uuid) -> StoreResult<RateLimitState> {
            Err(StoreError::Backend("connection reset".to_string()))
        }

        async fn save_rate_limit(&mut self, _state: &RateLimitState) -> StoreResult<()> {
            Ok(())
        }

        async fn checkpoint(&mut self) -> StoreResult<()> {
            Ok(())
        }

        async fn rollback_to_checkpoint(&mut self) -> StoreResult<()> {
            self.rolled_back = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn state_errors_fail_open() {
        let limiter = RateLimiter::new(RateLimitConfig::default(), FailurePolicy::FailOpen);
        let mut repo = BrokenRepo { rolled_back: false };

        let decision = limiter
            .check(&mut repo, Uuid::new_v4(), &dec("10"), None, start())
            .await
            .unwrap();

        assert_eq!(decision, RateLimitDecision::Degraded);
        assert!(repo.rolled_back);
    }

    #[tokio::test]
    async fn state_errors_propagate_when_fail_closed() {
        let limiter = RateLimiter::new(
            RateLimitConfig::default(),
            FailurePolicy::FailClosed { max_retries: 0 },
        );
        let mut repo = BrokenRepo { rolled_back: false };

        let result = limiter
            .check(&mut repo, Uuid::new_v4(), &dec("10"), None, start())
            .await;

        assert!(result.is_err());
        assert!(!repo.rolled_back);
    }
}
