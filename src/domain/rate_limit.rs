//! Per-user rate-limit state: weighted recent events plus an optional cooldown.
//!
//! Window arithmetic lives here so it can be replayed against any clock; the
//! limits themselves belong to `services::rate_limiter`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest window any limit looks at. Older events are pruned on read.
pub const HISTORY_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub at: DateTime<Utc>,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub user_id: Uuid,
    /// Ordered oldest first.
    pub events: Vec<RateLimitEvent>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub block_reason: Option<String>,
}

impl RateLimitState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            events: Vec::new(),
            blocked_until: None,
            block_reason: None,
        }
    }

    /// Drops events outside the history window. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(HISTORY_WINDOW_MINUTES);
        let before = self.events.len();
        self.events.retain(|event| event.at > cutoff);
        before - self.events.len()
    }

    /// Sum of weights strictly inside `(now - window, now]`.
    pub fn weight_within(&self, window: Duration, now: DateTime<Utc>) -> u32 {
        let cutoff = now - window;
        self.events
            .iter()
            .filter(|event| event.at > cutoff && event.at <= now)
            .map(|event| event.weight)
            .sum()
    }

    pub fn record(&mut self, weight: u32, now: DateTime<Utc>) {
        self.events.push(RateLimitEvent { at: now, weight });
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.blocked_until, Some(until) if now < until)
    }

    /// Clears a cooldown that has already run out. Returns true if anything changed.
    pub fn clear_expired_block(&mut self, now: DateTime<Utc>) -> bool {
        match self.blocked_until {
            Some(until) if now >= until => {
                self.clear_block();
                true
            }
            _ => false,
        }
    }

    pub fn block(&mut self, until: DateTime<Utc>, reason: impl Into<String>) {
        self.blocked_until = Some(until);
        self.block_reason = Some(reason.into());
    }

    pub fn clear_block(&mut self) {
        self.blocked_until = None;
        self.block_reason = None;
    }

    /// Whole minutes left on the cooldown, rounded up.
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> i64 {
        match self.blocked_until {
            Some(until) if now < until => {
                let seconds = (until - now).num_seconds();
                (seconds + 59) / 60
            }
            _ => 0,
        }
    }
}
