//! The pooled transport over mesh-dialed streams.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use futures_util::future::BoxFuture;

use connect_router::config::TransportConfig;
use connect_router::net::{BoxedMeshStream, MeshDialer};
use connect_router::resilience::RetryPolicy;
use connect_router::transport::{OutboundRequest, ProxyTransport, RequestBody, TransportError};

mod common;

use common::{FakeMesh, Readiness};

/// Never finishes a handshake.
struct StalledDialer;

impl MeshDialer for StalledDialer {
    fn dial_tls(&self, _network: &str, _address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
        Box::pin(std::future::pending())
    }
}

fn request(method: Method, uri: &str, body: &'static str) -> OutboundRequest {
    let mut headers = HeaderMap::new();
    headers.insert("host", "router.example".parse().unwrap());
    OutboundRequest {
        method,
        uri: uri.parse().unwrap(),
        headers,
        body: RequestBody::new(Body::from(body)),
    }
}

async fn text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn exchanges_over_mesh_stream() {
    let mesh = FakeMesh::new(Readiness::Ready);
    let transport = ProxyTransport::build(mesh.clone(), &TransportConfig::default(), RetryPolicy::default());

    let response = transport
        .execute("api", request(Method::POST, "https://api.service.consul/v1/items?limit=5", "payload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let echo: serde_json::Value = serde_json::from_str(&text(response.into_body()).await).unwrap();
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["path"], "/v1/items");
    assert_eq!(echo["query"], "limit=5");
    assert_eq!(echo["body"], "payload");
    assert_eq!(echo["headers"]["host"], serde_json::json!(["router.example"]));
    assert_eq!(mesh.dialed(), ["api.service.consul:443"]);
}

#[tokio::test]
async fn failed_dials_are_retried_with_backoff() {
    let mesh = FakeMesh::new(Readiness::Ready);
    mesh.make_unreachable("api");
    let transport = ProxyTransport::build(
        mesh.clone(),
        &TransportConfig::default(),
        RetryPolicy::new(3, Duration::from_millis(200)),
    );

    let started = Instant::now();
    let err = transport
        .execute("api", request(Method::GET, "https://api.service.consul/", ""))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Request { .. }));
    assert!(err.to_string().contains("connection refused"), "{err}");
    assert_eq!(mesh.dialed().len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn body_survives_refused_dials() {
    let mesh = FakeMesh::new(Readiness::Ready);
    mesh.refuse_dials("api", 2);
    let transport = ProxyTransport::build(
        mesh.clone(),
        &TransportConfig::default(),
        RetryPolicy::new(3, Duration::from_millis(10)),
    );

    let response = transport
        .execute("api", request(Method::PUT, "https://api.service.consul/items/1", "payload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let echo: serde_json::Value = serde_json::from_str(&text(response.into_body()).await).unwrap();
    assert_eq!(echo["body"], "payload");
    assert_eq!(mesh.dialed().len(), 3);
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    let config = TransportConfig {
        tls_handshake_timeout_secs: 1,
        ..TransportConfig::default()
    };
    let transport = ProxyTransport::build(Arc::new(StalledDialer), &config, RetryPolicy::none());

    let started = Instant::now();
    let err = transport
        .execute("api", request(Method::GET, "https://api.service.consul/", ""))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
