//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream flags (at startup):
//!     "service=api#path=/api#type=grpc#port=9090"
//!     → upstream.rs (parse key=value pairs into Upstream)
//!     → table.rs (stable sort by descending path length)
//!     → Freeze as immutable UpstreamTable
//!
//! Incoming request path
//!     → table.rs (first prefix hit in table order)
//!     → Return: matched Upstream or NotFound
//! ```
//!
//! # Design Decisions
//! - Table built once, shared read-only (no locks on the request path)
//! - Longest prefix wins; equal lengths keep input order
//! - Prefix test is a plain case-sensitive string test, not segment aware

pub mod table;
pub mod upstream;

pub use table::UpstreamTable;
pub use upstream::{ConnectionType, ParseError, Upstream, DEFAULT_UPSTREAM_PORT};
