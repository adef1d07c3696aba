//! Single-exchange HTTP client capability.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::TransportConfig;
use crate::net::{MeshConnector, MeshDialer};
use crate::transport::error::TransportError;

/// Perform exactly one HTTP exchange. No retries, no timeouts beyond the
/// implementation's own.
pub trait UpstreamClient: Send + Sync {
    fn send(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, TransportError>>;
}

/// Pooled hyper client whose every connection is dialed by the mesh.
#[derive(Clone)]
pub struct MeshHttpClient {
    client: Client<MeshConnector, Body>,
}

impl MeshHttpClient {
    pub fn new(dialer: Arc<dyn MeshDialer>, config: &TransportConfig) -> Self {
        let connector = MeshConnector::new(dialer, config.tls_handshake_timeout());
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.idle_timeout())
            .pool_max_idle_per_host(config.idle_per_host())
            .build(connector);

        tracing::debug!(
            tls_handshake_timeout = ?config.tls_handshake_timeout(),
            idle_timeout = ?config.idle_timeout(),
            max_idle_per_host = config.idle_per_host(),
            "Upstream client built"
        );

        Self { client }
    }
}

impl UpstreamClient for MeshHttpClient {
    fn send(&self, request: Request<Body>) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let response = self.client.request(request);
        Box::pin(async move {
            let response = response.await?;
            Ok(response.map(Body::new))
        })
    }
}
