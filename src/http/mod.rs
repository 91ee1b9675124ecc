//! HTTP boundary: maps requests to rate limiter calls and decisions to responses.

mod error;
mod extract;
mod handlers;
mod middleware;
mod router;
mod server;

pub use extract::{RequestPolicy, ANONYMOUS_CLIENT_ID};
pub use handlers::ClientStatus;
pub use middleware::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
pub use router::{build_router, AppState};
pub use server::HttpServer;
