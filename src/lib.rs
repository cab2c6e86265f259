//! Gatekeeper
//!
//! Request-admission gate for HTTP services: validates bearer-token callers
//! and enforces a shared GCRA rate budget against a Redis counter store
//! before any business logic runs. Designed to run identically on every
//! server instance behind a load balancer; the store's atomicity, not
//! in-process locking, orders concurrent decisions per key.

pub mod auth;
pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod redis;
pub mod routes;
pub mod store;

// Re-export main types
pub use auth::{AuthGate, Claims};
pub use error::{ApiError, AuthError, StoreError};
pub use limiter::{Decision, Quota};
pub use store::{CounterStore, MemoryCounterStore};
