//! Inbound request handling.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for tracing
//! - Capture what forwarding needs from the inbound request
//!
//! # Design Decisions
//! - Request ID added as early as possible so every span carries it
//! - The inbound host comes from `Host`, falling back to the URI authority
//!   (HTTP/2 requests carry it as `:authority`)

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Assigns `x-request-id` values to requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

/// A request as received from a client, before routing.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Peer address as seen by the router, forwarded as `X-Forwarded-For`.
    pub remote_addr: String,
    pub body: Body,
}

impl InboundRequest {
    pub fn from_http(request: Request<Body>, remote_addr: impl Into<String>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            remote_addr: remote_addr.into(),
            body,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// The host the client addressed.
    pub fn host(&self) -> Option<HeaderValue> {
        if let Some(host) = self.headers.get(HOST) {
            return Some(host.clone());
        }
        self.uri
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    }

    pub fn request_id(&self) -> &str {
        self.headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}
