//! HTTP server.
//!
//! # Responsibilities
//! - Build the axum app: one fallback handler, request id, trace span
//! - Run the accept loop on a bounded `Listener`
//! - Serve HTTP/1.1 and HTTP/2 per connection
//! - On shutdown: stop accepting, drain until the deadline, then force-close

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::http::forward::Forwarder;
use crate::http::request::{InboundRequest, MakeRequestUuid};
use crate::http::response::RouteError;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::ConnectionTracker;
use crate::net::{Listener, ListenerError};

/// Every path goes to the forwarder; there are no local routes.
pub fn build_app(forwarder: Arc<Forwarder>) -> axum::Router {
    axum::Router::new()
        .fallback(proxy_handler)
        .with_state(forwarder)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn proxy_handler(
    State(forwarder): State<Arc<Forwarder>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Result<Response<Body>, RouteError> {
    let inbound = InboundRequest::from_http(request, peer.ip().to_string());
    forwarder.forward(inbound).await
}

/// Accept connections until `shutdown` fires, then drain.
///
/// Returns `Ok` after a requested shutdown, or the first non-transient
/// accept error.
pub async fn serve(listener: Listener, app: axum::Router, mut shutdown: ShutdownSignal) -> Result<(), ListenerError> {
    let builder = auto::Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let tracker = ConnectionTracker::new();
    let mut connections = JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "HTTP server starting");
    }

    let deadline = loop {
        tokio::select! {
            deadline = shutdown.triggered() => break deadline,
            accepted = listener.accept() => {
                let (stream, peer, permit) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) if err.is_transient() => {
                        tracing::warn!(error = %err, "Transient accept error");
                        continue;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Listener failed");
                        return Err(err);
                    }
                };

                let guard = tracker.track();
                let tower_service = app.clone();
                let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(peer));
                    tower_service.clone().oneshot(request)
                });

                let conn = builder
                    .serve_connection_with_upgrades(TokioIo::new(stream), service)
                    .into_owned();
                let conn = graceful.watch(conn);

                connections.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = conn.await {
                        tracing::debug!(connection = %guard.id(), peer = %peer, error = %err, "Connection closed with error");
                    }
                });

                while connections.try_join_next().is_some() {}
            }
        }
    };

    drop(listener);
    tracing::info!(
        active_connections = tracker.active_count(),
        deadline = ?deadline,
        "Listener closed, draining connections"
    );

    tokio::select! {
        _ = graceful.shutdown() => tracing::info!("All connections drained"),
        _ = tokio::time::sleep(deadline) => {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Drain deadline passed, closing remaining connections"
            );
            connections.abort_all();
        }
    }
    while connections.join_next().await.is_some() {}

    tracing::info!("HTTP server stopped");
    Ok(())
}
