//! Pinglimit - Per-Client Rate Limiting Service
//!
//! This crate implements an HTTP service that admits or rejects requests per
//! client identifier using a token bucket. Requests carry the client in a
//! header; over-limit requests get `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
