//! Request forwarding.
//!
//! # Responsibilities
//! - Pick the upstream for a path (longest prefix)
//! - Rewrite the path and build the mesh destination URI
//! - Propagate headers, then pin `Host` and `X-Forwarded-For`
//! - Execute through the retrying transport and relay the answer
//!
//! # Design Decisions
//! - The matched route prefix is what gets stripped; `strip_prefix` on an
//!   upstream is parsed but not applied
//! - Prefix removal is literal, not segment aware (`/api` on `/apiary` leaves `/ary`)
//! - The request body streams through unread; it is resent on retry only if
//!   no attempt has consumed any of it

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::uri::InvalidUri;
use axum::http::{HeaderMap, HeaderValue, Response, Uri};

use crate::http::request::{InboundRequest, X_FORWARDED_FOR};
use crate::http::response::{relay, RouteError};
use crate::observability::metrics;
use crate::routing::{Upstream, UpstreamTable};
use crate::transport::{OutboundRequest, ProxyTransport, RequestBody};

/// Routes inbound requests to mesh upstreams.
pub struct Forwarder {
    table: Arc<UpstreamTable>,
    transport: ProxyTransport,
    mesh_domain: String,
}

impl Forwarder {
    pub fn new(table: Arc<UpstreamTable>, transport: ProxyTransport, mesh_domain: impl Into<String>) -> Self {
        Self {
            table,
            transport,
            mesh_domain: mesh_domain.into(),
        }
    }

    pub fn table(&self) -> &UpstreamTable {
        &self.table
    }

    /// Forward one request and return the upstream's response.
    pub async fn forward(&self, inbound: InboundRequest) -> Result<Response<Body>, RouteError> {
        let start = Instant::now();

        let Some(upstream) = self.table.find_match(inbound.path()) else {
            tracing::warn!(
                request_id = %inbound.request_id(),
                path = %inbound.path(),
                "No upstream defined"
            );
            metrics::record_request("none", 404, start);
            return Err(RouteError::NotFound {
                path: inbound.path().to_string(),
            });
        };

        let result = self.forward_to(upstream, inbound).await;
        let status = match &result {
            Ok(response) => response.status(),
            Err(err) => err.status(),
        };
        metrics::record_request(&upstream.service, status.as_u16(), start);
        result
    }

    async fn forward_to(&self, upstream: &Upstream, inbound: InboundRequest) -> Result<Response<Body>, RouteError> {
        let path = rewrite_path(inbound.path(), &upstream.path);
        let uri = destination_uri(&upstream.service, &self.mesh_domain, &path, inbound.query())?;
        let headers = outbound_headers(&inbound);
        let request_id = inbound.request_id().to_string();

        tracing::info!(
            request_id = %request_id,
            upstream = %upstream.service,
            connection_type = %upstream.connection_type,
            method = %inbound.method,
            uri = %uri,
            "Attempting to request from upstream"
        );

        let request = OutboundRequest {
            method: inbound.method,
            uri,
            headers,
            body: RequestBody::new(inbound.body),
        };

        let response = self
            .transport
            .execute(&upstream.service, request)
            .await
            .map_err(|source| {
                tracing::error!(
                    request_id = %request_id,
                    upstream = %upstream.service,
                    error = %source,
                    "Upstream unreachable after retries"
                );
                RouteError::Upstream {
                    service: upstream.service.clone(),
                    source,
                }
            })?;

        Ok(relay(response))
    }
}

/// Remove `prefix` from `path` and make sure the result is absolute.
pub fn rewrite_path(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

/// `https://<service>.<domain><path>[?<query>]`, query passed through untouched.
pub fn destination_uri(service: &str, domain: &str, path: &str, query: Option<&str>) -> Result<Uri, InvalidUri> {
    let mut uri = format!("https://{service}.{domain}{path}");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse()
}

/// Copy every inbound header value, then set `Host` and `X-Forwarded-For`
/// so client-supplied values for those two never survive.
pub fn outbound_headers(inbound: &InboundRequest) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.headers.len() + 2);
    for (name, value) in inbound.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    if let Some(host) = inbound.host() {
        headers.insert(HOST, host);
    }
    match HeaderValue::from_str(&inbound.remote_addr) {
        Ok(remote) => {
            headers.insert(X_FORWARDED_FOR, remote);
        }
        Err(_) => {
            headers.remove(X_FORWARDED_FOR);
            tracing::warn!(remote_addr = %inbound.remote_addr, "Remote address is not a valid header value");
        }
    }
    headers
}
