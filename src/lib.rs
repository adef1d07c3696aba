//! Connect Router
//!
//! A path-based reverse proxy that sits in front of a Consul Connect mesh.
//! Requests are matched against an upstream table by longest path prefix
//! and forwarded over mutually authenticated mesh TLS.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod transport;

// Mesh collaborators and alternate entry points
pub mod adapter;
pub mod mesh;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::RouterConfig;
pub use http::Forwarder;
pub use lifecycle::{Router, RouterError, RouterState};
pub use routing::{Upstream, UpstreamTable};
