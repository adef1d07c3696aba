//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → transport attempt (bounded by the request timeout)
//!     → On transport failure: retries.rs (wait, try again, up to the budget)
//!     → On any received response: done, whatever the status
//! ```
//!
//! # Design Decisions
//! - Retries cover transport failures only; a 5xx is an answer, not a failure
//! - Fixed attempt count with constant backoff and no jitter

pub mod retries;

pub use retries::RetryPolicy;
