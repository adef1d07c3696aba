//! Shared fakes for integration tests: an in-memory service registry and a
//! mesh whose dials land on a hyper stub upstream over `tokio::io::duplex`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use connect_router::config::{ListenerConfig, RouterConfig};
use connect_router::mesh::{MeshError, MeshService, MeshServiceFactory, ServiceRegistry};
use connect_router::net::{BoxedMeshStream, Listener, MeshDialer};
use connect_router::{Router, RouterError};

/// Records registrations; optionally refuses them or never answers.
#[derive(Default)]
pub struct FakeRegistry {
    pub registered: Mutex<Vec<String>>,
    pub fail: bool,
    pub hang: bool,
}

impl FakeRegistry {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::default()
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }
}

impl ServiceRegistry for FakeRegistry {
    fn register(&self, name: &str) -> BoxFuture<'static, Result<(), MeshError>> {
        self.registered.lock().unwrap().push(name.to_string());
        let fail = self.fail;
        let hang = self.hang;
        Box::pin(async move {
            if hang {
                std::future::pending::<()>().await;
            }
            if fail {
                Err(MeshError::NoRoots)
            } else {
                Ok(())
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    Failed,
}

/// Live stub connections and requests still being answered.
#[derive(Default)]
pub struct StubActivity {
    connections: AtomicUsize,
    in_flight: AtomicUsize,
}

impl StubActivity {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements its counter when dropped, however the owner ends.
struct Live<'a>(&'a AtomicUsize);

impl<'a> Live<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Live<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A mesh service that dials the in-process stub upstream.
pub struct FakeMesh {
    readiness: watch::Sender<Readiness>,
    pub dials: Mutex<Vec<String>>,
    pub unreachable: Mutex<HashSet<String>>,
    pub refusals: Mutex<BTreeMap<String, usize>>,
    pub closed: AtomicBool,
    pub activity: Arc<StubActivity>,
}

impl FakeMesh {
    pub fn new(readiness: Readiness) -> Arc<Self> {
        let (readiness, _) = watch::channel(readiness);
        Arc::new(Self {
            readiness,
            dials: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            refusals: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            activity: Arc::new(StubActivity::default()),
        })
    }

    pub fn set_ready(&self) {
        self.readiness.send_replace(Readiness::Ready);
    }

    pub fn make_unreachable(&self, service: &str) {
        self.unreachable.lock().unwrap().insert(service.to_string());
    }

    /// Refuse the next `count` dials to `service`, then connect normally.
    pub fn refuse_dials(&self, service: &str, count: usize) {
        self.refusals.lock().unwrap().insert(service.to_string(), count);
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MeshDialer for FakeMesh {
    fn dial_tls(&self, network: &str, address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
        assert_eq!(network, "tcp");
        self.dials.lock().unwrap().push(address.to_string());

        let service = address.split('.').next().unwrap_or_default().to_string();
        let refused = match self.refusals.lock().unwrap().get_mut(&service) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        let unreachable = refused || self.unreachable.lock().unwrap().contains(&service);
        let activity = Arc::clone(&self.activity);
        Box::pin(async move {
            if unreachable {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
            }
            Ok(Box::new(spawn_stub_upstream(service, activity)) as BoxedMeshStream)
        })
    }
}

impl MeshService for FakeMesh {
    fn ready(&self) -> BoxFuture<'static, Result<(), MeshError>> {
        let mut readiness = self.readiness.subscribe();
        Box::pin(async move {
            let state = *readiness
                .wait_for(|state| *state != Readiness::Pending)
                .await
                .map_err(|_| MeshError::Closed)?;
            match state {
                Readiness::Failed => Err(MeshError::Closed),
                _ => Ok(()),
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared `FakeMesh`; optionally refuses.
pub struct FakeMeshFactory {
    pub mesh: Arc<FakeMesh>,
    pub fail: bool,
    pub created: AtomicUsize,
}

impl FakeMeshFactory {
    pub fn new(mesh: Arc<FakeMesh>) -> Arc<Self> {
        Arc::new(Self {
            mesh,
            fail: false,
            created: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            mesh: FakeMesh::new(Readiness::Ready),
            fail: true,
            created: AtomicUsize::new(0),
        })
    }
}

impl MeshServiceFactory for FakeMeshFactory {
    fn new_service(&self, _name: &str) -> BoxFuture<'static, Result<Arc<dyn MeshService>, MeshError>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail {
            Err(MeshError::NoRoots)
        } else {
            Ok(Arc::clone(&self.mesh) as Arc<dyn MeshService>)
        };
        Box::pin(async move { result })
    }
}

/// Serve one stub connection on the far end of a duplex pipe.
///
/// The stub echoes what it received as JSON. Request headers steer it:
/// `x-stub-status` and `x-stub-body` replace status and body,
/// `x-stub-delay-ms` delays the answer, `x-stub-cookies` adds two
/// `set-cookie` headers. `activity` counts the open connection and each
/// request until its answer is sent or abandoned.
pub fn spawn_stub_upstream(service: String, activity: Arc<StubActivity>) -> tokio::io::DuplexStream {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let _connection = Live::enter(&activity.connections);
        let requests = Arc::clone(&activity);
        let service = hyper::service::service_fn(move |request| {
            stub_response(service.clone(), Arc::clone(&requests), request)
        });
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(server), service)
            .await;
    });
    client
}

async fn stub_response(
    service: String,
    activity: Arc<StubActivity>,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let _request = Live::enter(&activity.in_flight);
    let (parts, body) = request.into_parts();
    let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();

    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    if let Some(delay) = header("x-stub-delay-ms").and_then(|v| v.parse().ok()) {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = header("x-stub-status")
        .and_then(|v| v.parse::<u16>().ok())
        .and_then(|v| StatusCode::from_u16(v).ok())
        .unwrap_or(StatusCode::OK);

    let payload = match header("x-stub-body") {
        Some(text) => Bytes::from(text),
        None => {
            let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, value) in parts.headers.iter() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_str().unwrap_or_default().to_string());
            }
            let echo = serde_json::json!({
                "service": service,
                "method": parts.method.as_str(),
                "path": parts.uri.path(),
                "query": parts.uri.query(),
                "headers": headers,
                "body": String::from_utf8_lossy(&body),
            });
            Bytes::from(echo.to_string())
        }
    };

    let mut response = Response::builder().status(status).header("x-stub-service", service.as_str());
    if header("x-stub-cookies").is_some() {
        response = response.header("set-cookie", "a=1").header("set-cookie", "b=2");
    }
    Ok(response.body(Full::new(payload)).unwrap())
}

pub fn config(upstreams: &[&str]) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.upstreams = upstreams.iter().map(|s| s.to_string()).collect();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.retries.backoff_ms = 20;
    config
}

pub fn router(config: RouterConfig, registry: &Arc<FakeRegistry>, factory: &Arc<FakeMeshFactory>) -> Router {
    Router::new(
        config,
        Arc::clone(registry) as Arc<dyn ServiceRegistry>,
        Arc::clone(factory) as Arc<dyn MeshServiceFactory>,
    )
    .unwrap()
}

/// A running router with its fakes.
pub struct TestRouter {
    pub router: Arc<Router>,
    pub addr: SocketAddr,
    pub server: JoinHandle<Result<(), RouterError>>,
    pub mesh: Arc<FakeMesh>,
    pub registry: Arc<FakeRegistry>,
}

impl TestRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Run a router over a ready fake mesh and serve it on an ephemeral port.
pub async fn start_router(upstreams: &[&str]) -> TestRouter {
    let registry = Arc::new(FakeRegistry::default());
    let mesh = FakeMesh::new(Readiness::Ready);
    let factory = FakeMeshFactory::new(Arc::clone(&mesh));

    let config = config(upstreams);
    let listener_config = ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        ..config.listener.clone()
    };

    let router = Arc::new(router(config, &registry, &factory));
    router.run().await.unwrap();

    let listener = Listener::bind(&listener_config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = Arc::clone(&router);
    let server = tokio::spawn(async move { serving.serve(listener).await });

    TestRouter {
        router,
        addr,
        server,
        mesh,
        registry,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
