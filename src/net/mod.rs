//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking for drain)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     hyper client asks for a connection to https://<service>.<domain>
//!     → dial.rs (MeshConnector → MeshDialer::dial_tls)
//!     → mesh-authenticated TLS stream handed back to hyper
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Outbound sockets are never opened directly; the mesh dials and
//!   authenticates every upstream connection

pub mod connection;
pub mod dial;
pub mod listener;

pub use dial::{BoxedMeshStream, MeshConnector, MeshDialer, MeshIo, MeshStream};
pub use listener::{Listener, ListenerError};
