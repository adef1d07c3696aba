//! Retrying proxy transport.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response, Uri};

use crate::config::TransportConfig;
use crate::net::MeshDialer;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::transport::body::RequestBody;
use crate::transport::client::{MeshHttpClient, UpstreamClient};
use crate::transport::error::TransportError;

/// A fully built upstream request. The body streams from the client and can
/// be resent only until an attempt has read from it.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl OutboundRequest {
    fn to_http(&self) -> Option<Request<Body>> {
        let mut request = Request::new(self.body.checkout()?);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        Some(request)
    }
}

/// HTTP transport bound to the mesh, with bounded retry.
#[derive(Clone)]
pub struct ProxyTransport {
    client: Arc<dyn UpstreamClient>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl ProxyTransport {
    /// Build the production transport: pooled client dialing through `dialer`.
    pub fn build(dialer: Arc<dyn MeshDialer>, config: &TransportConfig, retry: RetryPolicy) -> Self {
        Self::with_client(Arc::new(MeshHttpClient::new(dialer, config)), config, retry)
    }

    /// Wrap any single-exchange client.
    pub fn with_client(client: Arc<dyn UpstreamClient>, config: &TransportConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            request_timeout: config.request_timeout(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send `request` to `upstream`, retrying transport failures.
    ///
    /// Any received response is returned as is, whatever its status. After
    /// the last failed attempt the last error is returned. A failed attempt
    /// that already streamed part of the body is not retried.
    pub async fn execute(&self, upstream: &str, request: OutboundRequest) -> Result<Response<Body>, TransportError> {
        let mut pending = request.to_http().ok_or(TransportError::BodyConsumed)?;
        let mut attempt = 1;
        loop {
            let err = match self.attempt(pending).await {
                Ok(response) => {
                    tracing::info!(
                        upstream = %upstream,
                        attempt,
                        outcome = "response",
                        status = response.status().as_u16(),
                        "Upstream responded"
                    );
                    metrics::record_attempt(upstream, "response");
                    return Ok(response);
                }
                Err(err) => err,
            };

            let outcome = err.outcome();
            tracing::warn!(
                upstream = %upstream,
                attempt,
                outcome,
                error = %err,
                "Unable to contact upstream"
            );
            metrics::record_attempt(upstream, outcome);

            if !self.retry.should_retry(attempt) {
                return Err(err);
            }
            pending = match request.to_http() {
                Some(next) => next,
                None => {
                    tracing::warn!(upstream = %upstream, attempt, "Request body already streamed, not retrying");
                    return Err(err);
                }
            };
            tokio::time::sleep(self.retry.backoff()).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        tokio::time::timeout(self.request_timeout, self.client.send(request))
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))?
    }
}
