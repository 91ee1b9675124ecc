//! Rate limiting logic and state management.

mod bucket;
mod client_id;
mod eviction;
mod limiter;
mod overrides;

pub use bucket::{BucketLimits, ClientBucket, Decision};
pub use client_id::{ClientId, MAX_CLIENT_ID_LEN};
pub use eviction::spawn_eviction_task;
pub use limiter::{validate_cost, BucketSnapshot, RateLimiter, DEFAULT_COST};
pub use overrides::{ClientOverride, ClientOverrides};
