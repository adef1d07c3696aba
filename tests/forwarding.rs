//! End-to-end forwarding through the HTTP server and the fake mesh.

use std::time::{Duration, Instant};

use serde_json::Value;

mod common;

const TABLE: [&str; 4] = [
    "service=blah#path=/blah",
    "service=something#path=/api/something",
    "service=frontend#path=/",
    "service=api#path=/api",
];

#[tokio::test]
async fn relays_status_and_body_from_matched_upstream() {
    let harness = common::start_router(&["service=test#path=/test"]).await;

    let response = common::client()
        .post(harness.url("/test"))
        .header("x-stub-status", "418")
        .header("x-stub-body", "testbody")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.text().await.unwrap(), "testbody");
    assert_eq!(harness.mesh.dialed(), ["test.service.consul:443"]);
}

#[tokio::test]
async fn longest_prefix_wins_and_prefix_is_stripped() {
    let harness = common::start_router(&TABLE).await;
    let client = common::client();

    let cases = [
        ("/api/something/deep?x=1&y=two", "something", "/deep", Some("x=1&y=two")),
        ("/api/users", "api", "/users", None),
        ("/blah", "blah", "/", None),
        ("/index.html", "frontend", "/index.html", None),
    ];

    for (path, service, upstream_path, query) in cases {
        let echo: Value = client.get(harness.url(path)).send().await.unwrap().json().await.unwrap();
        assert_eq!(echo["service"], service, "{path}");
        assert_eq!(echo["path"], upstream_path, "{path}");
        assert_eq!(echo["query"].as_str(), query, "{path}");
    }
}

#[tokio::test]
async fn pins_host_and_forwarded_for_and_keeps_other_headers() {
    let harness = common::start_router(&["service=api#path=/"]).await;

    let echo: Value = common::client()
        .get(harness.url("/headers"))
        .header("x-forwarded-for", "6.6.6.6")
        .header("x-custom", "one")
        .header("accept", "text/html")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let headers = &echo["headers"];
    assert_eq!(headers["x-forwarded-for"], serde_json::json!(["127.0.0.1"]));
    assert_eq!(headers["host"], serde_json::json!([harness.addr.to_string()]));
    assert_eq!(headers["x-custom"], serde_json::json!(["one"]));
    assert_eq!(headers["accept"], serde_json::json!(["text/html"]));
    assert_eq!(headers["x-request-id"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn request_id_is_returned_and_propagated() {
    let harness = common::start_router(&["service=api#path=/"]).await;

    let response = common::client()
        .get(harness.url("/"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let echo: Value = response.json().await.unwrap();
    assert_eq!(echo["headers"]["x-request-id"], serde_json::json!(["req-123"]));
}

#[tokio::test]
async fn forwards_method_and_body() {
    let harness = common::start_router(&["service=api#path=/api"]).await;

    let echo: Value = common::client()
        .put(harness.url("/api/items/7"))
        .body("{\"name\":\"widget\"}")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(echo["method"], "PUT");
    assert_eq!(echo["path"], "/items/7");
    assert_eq!(echo["body"], "{\"name\":\"widget\"}");
}

#[tokio::test]
async fn relays_every_response_header() {
    let harness = common::start_router(&["service=api#path=/"]).await;

    let response = common::client()
        .get(harness.url("/cookies"))
        .header("x-stub-cookies", "1")
        .send()
        .await
        .unwrap();

    let cookies: Vec<_> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, ["a=1", "b=2"]);
    assert_eq!(response.headers()["x-stub-service"], "api");
}

#[tokio::test]
async fn upstream_5xx_is_relayed_without_retry() {
    let harness = common::start_router(&["service=api#path=/"]).await;

    let response = common::client()
        .get(harness.url("/broken"))
        .header("x-stub-status", "503")
        .header("x-stub-body", "down for maintenance")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(response.text().await.unwrap(), "down for maintenance");
    assert_eq!(harness.mesh.dialed().len(), 1);
}

#[tokio::test]
async fn unreachable_upstream_is_retried_then_500() {
    let harness = common::start_router(&["service=down#path=/"]).await;
    harness.mesh.make_unreachable("down");

    let started = Instant::now();
    let response = common::client().get(harness.url("/")).send().await.unwrap();

    assert_eq!(response.status().as_u16(), 500);
    let body = response.text().await.unwrap();
    assert!(body.contains("connection refused"), "{body}");
    assert_eq!(harness.mesh.dialed().len(), 3);
    // Two backoff sleeps between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn unmapped_path_is_404() {
    let harness = common::start_router(&["service=api#path=/api"]).await;

    let response = common::client().get(harness.url("/unmapped")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text().await.unwrap(), "No upstream defined for path");
    assert!(harness.mesh.dialed().is_empty());
}

/// Poll `condition` every 10ms for up to 5s.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn client_disconnect_cancels_the_upstream_request() {
    let harness = common::start_router(&["service=slow#path=/"]).await;
    let activity = std::sync::Arc::clone(&harness.mesh.activity);

    let request = common::client()
        .get(harness.url("/report"))
        .header("x-stub-delay-ms", "30000")
        .send();
    let pending = tokio::spawn(request);

    assert!(eventually(|| activity.in_flight() == 1).await, "upstream never saw the request");
    assert_eq!(activity.connections(), 1);

    pending.abort();

    assert!(
        eventually(|| activity.in_flight() == 0).await,
        "upstream request outlived the client"
    );
    assert!(
        eventually(|| activity.connections() == 0).await,
        "upstream connection was not released"
    );
    assert_eq!(harness.mesh.dialed().len(), 1);
}
