//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper connection, axum handler, request id, trace span)
//!     → request.rs (InboundRequest: method, uri, headers, host, remote addr)
//!     → forward.rs (route lookup, path rewrite, header propagation)
//!     → transport (mesh TLS, retry)
//!     → response.rs (relay status/headers/body, or map RouteError)
//!     → Send to client
//! ```

pub mod forward;
pub mod request;
pub mod response;
pub mod server;

pub use forward::Forwarder;
pub use request::{InboundRequest, MakeRequestUuid, X_FORWARDED_FOR, X_REQUEST_ID};
pub use response::RouteError;
pub use server::{build_app, serve};
