//! Token bucket state for a single client.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PinglimitError, Result};

/// Capacity and refill rate of a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketLimits {
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,
    /// Tokens added per second of elapsed time
    pub refill_rate_per_second: f64,
}

impl BucketLimits {
    /// Create validated limits. Both values must be positive and finite.
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Result<Self> {
        let limits = Self {
            capacity,
            refill_rate_per_second,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Check that both values are positive and finite.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(PinglimitError::InvalidLimits(format!(
                "capacity must be a positive number, got {}",
                self.capacity
            )));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(PinglimitError::InvalidLimits(format!(
                "refill_rate_per_second must be a positive number, got {}",
                self.refill_rate_per_second
            )));
        }
        Ok(())
    }
}

/// Outcome of an admission check.
///
/// `limit` is the capacity of the bucket that made the decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed; `remaining` tokens are left after the debit.
    Admit { remaining: f64, limit: f64 },
    /// The request is over the limit.
    ///
    /// `retry_after` is how long until enough tokens accumulate, or `None`
    /// when the cost exceeds the bucket capacity or the wait is too long to
    /// represent.
    Reject {
        retry_after: Option<Duration>,
        limit: f64,
    },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }

    pub fn limit(&self) -> f64 {
        match self {
            Decision::Admit { limit, .. } | Decision::Reject { limit, .. } => *limit,
        }
    }
}

/// Per-client token bucket.
#[derive(Debug)]
pub struct ClientBucket {
    tokens: f64,
    last_refill_at: Instant,
    limits: BucketLimits,
    created_at: DateTime<Utc>,
    /// Set under the bucket lock when the bucket is dropped from the map.
    pub(super) evicted: bool,
}

impl ClientBucket {
    /// Create a full bucket.
    pub fn new(limits: BucketLimits, now: Instant) -> Self {
        Self {
            tokens: limits.capacity,
            last_refill_at: now,
            limits,
            created_at: Utc::now(),
            evicted: false,
        }
    }

    /// Add tokens for the time elapsed since the last refill, capped at capacity.
    ///
    /// A `now` earlier than the last refill adds nothing and does not move the
    /// refill timestamp backwards.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        self.tokens = self.projected_tokens(now);
        self.last_refill_at += elapsed;
    }

    /// Refill, then debit `cost` if enough tokens are available.
    pub fn try_consume(&mut self, cost: f64, now: Instant) -> Decision {
        self.refill(now);

        if self.tokens >= cost {
            self.tokens -= cost;
            Decision::Admit {
                remaining: self.tokens,
                limit: self.limits.capacity,
            }
        } else {
            Decision::Reject {
                retry_after: self.retry_after(cost),
                limit: self.limits.capacity,
            }
        }
    }

    /// Time until `cost` tokens will be available, assuming no other debits.
    pub fn retry_after(&self, cost: f64) -> Option<Duration> {
        if cost > self.limits.capacity {
            return None;
        }
        let missing = (cost - self.tokens).max(0.0);
        Duration::try_from_secs_f64(missing / self.limits.refill_rate_per_second).ok()
    }

    /// Refill the bucket to capacity.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = self.limits.capacity;
        if now > self.last_refill_at {
            self.last_refill_at = now;
        }
    }

    /// Tokens the bucket would hold at `now`, without mutating it.
    pub fn projected_tokens(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        (self.tokens + elapsed.as_secs_f64() * self.limits.refill_rate_per_second)
            .min(self.limits.capacity)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_refill_at(&self) -> Instant {
        self.last_refill_at
    }

    pub fn limits(&self) -> BucketLimits {
        self.limits
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the bucket has not been touched for at least `older_than`.
    pub fn is_idle(&self, older_than: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill_at) >= older_than
    }
}
