//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use super::bucket::{BucketLimits, ClientBucket, Decision};
use super::client_id::{self, ClientId};
use super::overrides::ClientOverrides;
use crate::error::{PinglimitError, Result};

/// Cost charged for a request that does not specify one.
pub const DEFAULT_COST: f64 = 1.0;

type SharedBucket = Arc<Mutex<ClientBucket>>;

/// The core rate limiter that owns every client's token bucket.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Buckets live in a sharded map and each one has its own lock, so requests
/// from different clients do not serialise on each other.
pub struct RateLimiter {
    /// Token buckets indexed by client identifier
    buckets: DashMap<ClientId, SharedBucket>,
    /// Limits for clients without an override
    defaults: BucketLimits,
    /// Per-client limits
    overrides: RwLock<ClientOverrides>,
}

/// Read-only view of a client's bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    /// Tokens available right now, including refill since the last request
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate_per_second: f64,
    /// Seconds since the bucket was last touched
    pub idle_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl RateLimiter {
    /// Create a rate limiter where every client gets `defaults`.
    pub fn new(defaults: BucketLimits) -> Self {
        Self::with_overrides(defaults, ClientOverrides::new())
    }

    /// Create a rate limiter with per-client overrides.
    pub fn with_overrides(defaults: BucketLimits, overrides: ClientOverrides) -> Self {
        Self {
            buckets: DashMap::new(),
            defaults,
            overrides: RwLock::new(overrides),
        }
    }

    /// Refill the client's bucket and try to debit `cost` tokens.
    pub fn check_and_consume(&self, client_id: &str, cost: f64) -> Result<Decision> {
        self.check_and_consume_at(client_id, cost, Instant::now())
    }

    /// Same as [`check_and_consume`](Self::check_and_consume) with an explicit clock reading.
    pub fn check_and_consume_at(&self, client_id: &str, cost: f64, now: Instant) -> Result<Decision> {
        validate_cost(cost)?;
        client_id::validate(client_id)?;

        trace!(client_id = %client_id, cost = cost, "Checking rate limit");

        let decision = self.with_bucket(client_id, now, |bucket| bucket.try_consume(cost, now))?;

        match decision {
            Decision::Admit { remaining, .. } => {
                trace!(client_id = %client_id, tokens = remaining, "Request admitted");
            }
            Decision::Reject { retry_after, .. } => {
                debug!(
                    client_id = %client_id,
                    cost = cost,
                    retry_after = ?retry_after,
                    "Rate limit exceeded"
                );
            }
        }

        Ok(decision)
    }

    /// Remove buckets that have not been touched for at least `older_than`.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_stale(&self, older_than: Duration) -> usize {
        self.evict_stale_at(older_than, Instant::now())
    }

    /// Same as [`evict_stale`](Self::evict_stale) with an explicit clock reading.
    pub fn evict_stale_at(&self, older_than: Duration, now: Instant) -> usize {
        let mut evicted = 0;

        self.buckets.retain(|_, bucket| {
            // The shard is write-locked, so no new reference can be taken. Any
            // outstanding clone belongs to an in-flight request.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let Some(mut state) = bucket.try_lock() else {
                return true;
            };
            if !state.is_idle(older_than, now) {
                return true;
            }
            state.evicted = true;
            evicted += 1;
            false
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.buckets.len(), "Evicted stale buckets");
        }
        evicted
    }

    /// Refill a client's bucket to capacity, creating it if needed.
    pub fn reset(&self, client_id: &str) -> Result<()> {
        client_id::validate(client_id)?;
        let now = Instant::now();
        self.with_bucket(client_id, now, |bucket| bucket.reset(now))?;
        debug!(client_id = %client_id, "Bucket reset");
        Ok(())
    }

    /// Drop a client's bucket. Returns whether one existed.
    pub fn remove(&self, client_id: &str) -> bool {
        match self.buckets.remove(client_id) {
            Some((_, bucket)) => {
                bucket.lock().evicted = true;
                true
            }
            None => false,
        }
    }

    /// Read a client's bucket without consuming or refilling it.
    pub fn snapshot(&self, client_id: &str) -> Option<BucketSnapshot> {
        let bucket = self.buckets.get(client_id).map(|b| Arc::clone(b.value()))?;
        let now = Instant::now();
        let state = bucket.lock();
        let limits = state.limits();

        Some(BucketSnapshot {
            tokens: state.projected_tokens(now),
            capacity: limits.capacity,
            refill_rate_per_second: limits.refill_rate_per_second,
            idle_secs: now.saturating_duration_since(state.last_refill_at()).as_secs_f64(),
            created_at: state.created_at(),
        })
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Limits that apply to clients without an override.
    pub fn defaults(&self) -> BucketLimits {
        self.defaults
    }

    /// Limits a new bucket for this client would get.
    pub fn limits_for(&self, client_id: &str) -> BucketLimits {
        self.overrides.read().get(client_id).unwrap_or(self.defaults)
    }

    /// Whether the client has an override.
    pub fn has_override(&self, client_id: &str) -> bool {
        self.overrides.read().get(client_id).is_some()
    }

    /// Set a client's limits. The client's current bucket is dropped so the
    /// new limits apply from its next request.
    pub fn set_override(&self, client_id: &str, limits: BucketLimits) -> Result<()> {
        client_id::validate(client_id)?;
        limits.validate()?;

        self.overrides.write().insert(client_id, limits);
        self.remove(client_id);

        debug!(
            client_id = %client_id,
            capacity = limits.capacity,
            refill_rate_per_second = limits.refill_rate_per_second,
            "Client override set"
        );
        Ok(())
    }

    /// Remove a client's override and bucket. Returns whether an override existed.
    pub fn remove_override(&self, client_id: &str) -> bool {
        let removed = self.overrides.write().remove(client_id).is_some();
        self.remove(client_id);
        if removed {
            debug!(client_id = %client_id, "Client override removed");
        }
        removed
    }

    /// Run `f` on the client's bucket under its lock.
    ///
    /// Retries when the bucket was removed from the map between lookup and
    /// locking, so updates never land on a dropped bucket.
    fn with_bucket<T>(
        &self,
        client_id: &str,
        now: Instant,
        mut f: impl FnMut(&mut ClientBucket) -> T,
    ) -> Result<T> {
        loop {
            let bucket = self.bucket_for(client_id, now)?;
            let mut state = bucket.lock();
            if state.evicted {
                continue;
            }
            return Ok(f(&mut state));
        }
    }

    /// Get or lazily create the bucket for a client.
    fn bucket_for(&self, client_id: &str, now: Instant) -> Result<SharedBucket> {
        if let Some(bucket) = self.buckets.get(client_id) {
            return Ok(Arc::clone(bucket.value()));
        }

        // Limits are read under the shard lock so a concurrent `set_override`
        // either sees this bucket and drops it, or is seen by it.
        let bucket = self
            .buckets
            .entry(ClientId::new(client_id)?)
            .or_insert_with(|| {
                let limits = self.limits_for(client_id);
                debug!(
                    client_id = %client_id,
                    capacity = limits.capacity,
                    refill_rate_per_second = limits.refill_rate_per_second,
                    "Creating new bucket"
                );
                Arc::new(Mutex::new(ClientBucket::new(limits, now)))
            });
        Ok(Arc::clone(bucket.value()))
    }
}

/// Check that a cost is a positive finite number.
pub fn validate_cost(cost: f64) -> Result<()> {
    if !cost.is_finite() || cost <= 0.0 {
        return Err(PinglimitError::InvalidCost(format!(
            "cost must be a positive number, got {}",
            cost
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Barrier;

    fn limiter(capacity: f64, rate: f64) -> RateLimiter {
        RateLimiter::new(BucketLimits::new(capacity, rate).unwrap())
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = limiter(10.0, 1.0);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_check_creates_bucket() {
        let limiter = limiter(10.0, 1.0);

        let decision = limiter.check_and_consume("a", 1.0).unwrap();

        assert!(decision.is_admit());
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_burst_then_refill() {
        let limiter = limiter(5.0, 1.0);
        let start = Instant::now();

        for i in 0..5 {
            let decision = limiter.check_and_consume_at("A", 1.0, start).unwrap();
            assert!(decision.is_admit(), "Request {} should be admitted", i + 1);
        }

        let decision = limiter.check_and_consume_at("A", 1.0, start).unwrap();
        assert!(!decision.is_admit());

        let decision = limiter
            .check_and_consume_at("A", 1.0, start + Duration::from_secs(1))
            .unwrap();
        assert!(decision.is_admit());
    }

    #[test]
    fn test_reject_reports_retry_after() {
        let limiter = limiter(1.0, 2.0);
        let now = Instant::now();

        limiter.check_and_consume_at("a", 1.0, now).unwrap();
        let decision = limiter.check_and_consume_at("a", 1.0, now).unwrap();

        assert_eq!(
            decision,
            Decision::Reject {
                retry_after: Some(Duration::from_millis(500)),
                limit: 1.0
            }
        );
    }

    #[test]
    fn test_invalid_cost() {
        let limiter = limiter(5.0, 1.0);

        for cost in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                limiter.check_and_consume("a", cost),
                Err(PinglimitError::InvalidCost(_))
            ));
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_empty_client_rejected() {
        let limiter = limiter(5.0, 1.0);

        assert!(matches!(
            limiter.check_and_consume("", 1.0),
            Err(PinglimitError::InvalidClient(_))
        ));
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_clients_are_isolated() {
        let limiter = limiter(3.0, 1.0);
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_and_consume_at("a", 1.0, now).unwrap();
        }
        assert!(!limiter.check_and_consume_at("a", 1.0, now).unwrap().is_admit());

        assert_eq!(
            limiter.check_and_consume_at("b", 1.0, now).unwrap(),
            Decision::Admit {
                remaining: 2.0,
                limit: 3.0
            }
        );
    }

    #[test]
    fn test_evict_stale() {
        let limiter = limiter(5.0, 1.0);
        let start = Instant::now();

        limiter.check_and_consume_at("old", 1.0, start).unwrap();
        limiter
            .check_and_consume_at("recent", 1.0, start + Duration::from_secs(2))
            .unwrap();

        // "old" has been idle 61s, "recent" 59s
        let now = start + Duration::from_secs(61);
        let evicted = limiter.evict_stale_at(Duration::from_secs(60), now);

        assert_eq!(evicted, 1);
        assert!(limiter.snapshot("old").is_none());
        assert!(limiter.snapshot("recent").is_some());
    }

    #[test]
    fn test_evicted_client_starts_full() {
        let limiter = limiter(2.0, 0.001);
        let start = Instant::now();

        limiter.check_and_consume_at("a", 2.0, start).unwrap();
        let later = start + Duration::from_secs(120);
        assert_eq!(limiter.evict_stale_at(Duration::from_secs(60), later), 1);

        assert_eq!(
            limiter.check_and_consume_at("a", 1.0, later).unwrap(),
            Decision::Admit {
                remaining: 1.0,
                limit: 2.0
            }
        );
    }

    #[test]
    fn test_evict_skips_buckets_in_use() {
        let limiter = limiter(5.0, 1.0);
        let start = Instant::now();
        limiter.check_and_consume_at("a", 1.0, start).unwrap();

        let held = limiter.bucket_for("a", start).unwrap();
        let evicted = limiter.evict_stale_at(Duration::from_secs(1), start + Duration::from_secs(10));

        assert_eq!(evicted, 0);
        drop(held);
        assert_eq!(
            limiter.evict_stale_at(Duration::from_secs(1), start + Duration::from_secs(10)),
            1
        );
    }

    #[test]
    fn test_removed_bucket_is_not_updated() {
        let limiter = limiter(5.0, 1.0);
        let now = Instant::now();
        limiter.check_and_consume_at("a", 1.0, now).unwrap();

        let stale = limiter.bucket_for("a", now).unwrap();
        assert!(limiter.remove("a"));
        assert!(stale.lock().evicted);

        assert_eq!(
            limiter.check_and_consume_at("a", 1.0, now).unwrap(),
            Decision::Admit {
                remaining: 4.0,
                limit: 5.0
            }
        );
        assert_eq!(stale.lock().tokens(), 4.0);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_reset() {
        let limiter = limiter(3.0, 0.001);

        for _ in 0..3 {
            limiter.check_and_consume("a", 1.0).unwrap();
        }
        assert!(!limiter.check_and_consume("a", 1.0).unwrap().is_admit());

        limiter.reset("a").unwrap();
        assert!(limiter.check_and_consume("a", 1.0).unwrap().is_admit());
        assert!(limiter.reset("").is_err());
    }

    #[test]
    fn test_override_applies_to_new_bucket() {
        let limiter = limiter(2.0, 1.0);
        let now = Instant::now();
        limiter.check_and_consume_at("vip", 1.0, now).unwrap();

        limiter
            .set_override("vip", BucketLimits::new(10.0, 5.0).unwrap())
            .unwrap();
        assert!(limiter.has_override("vip"));
        assert_eq!(limiter.bucket_count(), 0);

        assert_eq!(
            limiter.check_and_consume_at("vip", 1.0, now).unwrap(),
            Decision::Admit {
                remaining: 9.0,
                limit: 10.0
            }
        );
        assert_eq!(limiter.limits_for("other"), limiter.defaults());
    }

    #[test]
    fn test_override_wins_against_concurrent_first_request() {
        let vip = BucketLimits::new(10.0, 1.0).unwrap();

        for _ in 0..200 {
            let limiter = limiter(2.0, 1.0);
            let barrier = Barrier::new(2);
            let (limiter, barrier) = (&limiter, &barrier);

            std::thread::scope(|s| {
                s.spawn(move || {
                    barrier.wait();
                    limiter.check_and_consume("vip", 1.0).unwrap();
                });
                barrier.wait();
                limiter.set_override("vip", vip).unwrap();
            });

            // Whatever the interleaving, the request after set_override
            // returns runs against the new limits.
            let decision = limiter.check_and_consume("vip", 1.0).unwrap();
            assert_eq!(decision.limit(), 10.0);
        }
    }

    #[test]
    fn test_remove_override() {
        let limiter = limiter(2.0, 1.0);
        limiter
            .set_override("vip", BucketLimits::new(10.0, 5.0).unwrap())
            .unwrap();

        assert!(limiter.remove_override("vip"));
        assert!(!limiter.remove_override("vip"));
        assert_eq!(limiter.limits_for("vip").capacity, 2.0);
    }

    #[test]
    fn test_set_override_validates() {
        let limiter = limiter(2.0, 1.0);
        let bad = BucketLimits {
            capacity: -1.0,
            refill_rate_per_second: 1.0,
        };

        assert!(limiter.set_override("a", bad).is_err());
        assert!(limiter.set_override("", BucketLimits::new(1.0, 1.0).unwrap()).is_err());
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let limiter = limiter(4.0, 1.0);
        let now = Instant::now();
        limiter.check_and_consume_at("a", 3.0, now).unwrap();

        let first = limiter.snapshot("a").unwrap();
        let second = limiter.snapshot("a").unwrap();

        assert_eq!(first.capacity, 4.0);
        assert!(first.tokens >= 1.0 && first.tokens <= 4.0);
        assert!(second.tokens >= first.tokens);
        assert!(limiter.snapshot("missing").is_none());
    }

    #[test]
    fn test_concurrent_same_client() {
        let limiter = limiter(10.0, 1.0);
        let now = Instant::now();
        let barrier = Barrier::new(50);
        let (limiter, barrier) = (&limiter, &barrier);

        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..50)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        limiter.check_and_consume_at("A", 1.0, now).unwrap().is_admit()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|admitted| *admitted)
                .count()
        });

        assert_eq!(admitted, 10);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_concurrent_empty_client_always_invalid() {
        let limiter = limiter(10.0, 1.0);
        let barrier = Barrier::new(20);

        std::thread::scope(|s| {
            for i in 0..20 {
                let limiter = &limiter;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let id = if i % 2 == 0 { "" } else { "real" };
                    let result = limiter.check_and_consume(id, 1.0);
                    if id.is_empty() {
                        assert!(matches!(result, Err(PinglimitError::InvalidClient(_))));
                    } else {
                        assert!(result.is_ok());
                    }
                });
            }
        });

        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_burst_bound_holds_over_any_window() {
        let capacity = 5.0;
        let rate = 2.0;
        let limiter = limiter(capacity, rate);
        let mut rng = StdRng::seed_from_u64(7);
        let start = Instant::now();

        let mut elapsed = Duration::ZERO;
        let mut admits = Vec::new();
        for _ in 0..2000 {
            elapsed += Duration::from_millis(rng.gen_range(0..200));
            if limiter
                .check_and_consume_at("A", 1.0, start + elapsed)
                .unwrap()
                .is_admit()
            {
                admits.push(elapsed);
            }
        }

        for window in [0.25, 1.0, 3.0, 10.0] {
            let window_len = Duration::from_secs_f64(window);
            for (i, from) in admits.iter().enumerate() {
                let in_window = admits[i..]
                    .iter()
                    .take_while(|t| **t - *from <= window_len)
                    .count();
                assert!(
                    in_window as f64 <= capacity + rate * window + 1e-9,
                    "{} admits within {}s",
                    in_window,
                    window
                );
            }
        }
    }
}
