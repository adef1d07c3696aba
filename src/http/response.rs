//! Response handling.
//!
//! # Responsibilities
//! - Relay the upstream response: status, every header value, streamed body
//! - Map forwarding errors to client-facing status codes
//!
//! # Design Decisions
//! - Bodies stream through in both directions; the upstream body is released
//!   when the relayed body is dropped, on success and on client disconnect alike
//! - Error bodies are plain text

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

use crate::transport::TransportError;

/// Why a request could not be forwarded.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No upstream prefix matches the path.
    #[error("No upstream defined for path")]
    NotFound { path: String },

    /// Every transport attempt failed.
    #[error("{source}")]
    Upstream {
        service: String,
        #[source]
        source: TransportError,
    },

    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUri),
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::NotFound { .. } => StatusCode::NOT_FOUND,
            RouteError::Upstream { .. } | RouteError::InvalidUri(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Rebuild the upstream response for the client, appending every header value.
pub fn relay(upstream: Response<Body>) -> Response<Body> {
    let (parts, body) = upstream.into_parts();

    let mut response = Response::new(body);
    *response.status_mut() = parts.status;
    let headers = response.headers_mut();
    for (name, value) in parts.headers.iter() {
        headers.append(name.clone(), value.clone());
    }
    response
}
