//! Event-driven entry points.
//!
//! An adapter turns one invocation event into one `InboundRequest`, runs it
//! through the same `Forwarder` the HTTP server uses, and turns the answer
//! back into the event's response shape.

pub mod gateway;

pub use gateway::{GatewayError, GatewayRequest, GatewayResponse};
