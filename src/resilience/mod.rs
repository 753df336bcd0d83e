//! Resilience helpers.
//!
//! # Design Decisions
//! - Adapters never retry writes internally; a blind retry could spend
//!   twice. Callers retry `is_retryable()` errors with the same
//!   idempotency key
//! - Read-side polling (confirmation tracking) backs off exponentially on
//!   node errors so an outage does not turn into a request storm
//! - Every node call has a deadline; see the RPC clients

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
