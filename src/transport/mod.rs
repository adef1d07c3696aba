//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest (method, uri, headers, streaming body)
//!     → proxy.rs (attempt loop: timeout per attempt, retry on transport error)
//!     → body.rs (each attempt checks the body out; unread bodies come back)
//!     → client.rs (one HTTP exchange through the pooled client)
//!     → net::dial (mesh TLS connection, only when the pool has none idle)
//! ```
//!
//! # Design Decisions
//! - One HTTP exchange is the `UpstreamClient` trait; retry lives above it
//! - The pool is owned by hyper; the transport is cloned into every request
//! - Request bodies are never collected, so a retry is only possible while
//!   no body frame has been sent

pub mod body;
pub mod client;
pub mod error;
pub mod proxy;

pub use body::RequestBody;
pub use client::{MeshHttpClient, UpstreamClient};
pub use error::{report, TransportError};
pub use proxy::{OutboundRequest, ProxyTransport};
