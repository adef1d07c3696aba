//! The router aggregate.
//!
//! # Responsibilities
//! - Own the upstream table, the mesh service, the transport and the server
//! - Register with the catalog and wait for mesh TLS material
//! - Serve until stopped, then drain within the caller's deadline
//!
//! # Design Decisions
//! - Every method takes `&self` so a signal task can call `stop` while
//!   `run` or `listen_and_serve` is in progress
//! - State changes are compare-and-set on a watch channel; callers can
//!   observe them
//! - Startup failures leave the router `Stopped`

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::RouterConfig;
use crate::http::{build_app, serve, Forwarder};
use crate::lifecycle::Shutdown;
use crate::mesh::{MeshError, MeshService, MeshServiceFactory, ServiceDialer, ServiceRegistry};
use crate::net::{Listener, ListenerError, MeshDialer};
use crate::resilience::RetryPolicy;
use crate::routing::{ParseError, UpstreamTable};
use crate::transport::ProxyTransport;

/// Time past the drain deadline for aborted connections to be reaped.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    Registering,
    AwaitingMeshReady,
    Serving,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unable to parse upstreams: {0}")]
    Upstreams(#[from] ParseError),
    #[error("service registration failed: {0}")]
    Registration(#[source] MeshError),
    #[error("unable to create mesh service: {0}")]
    MeshService(#[source] MeshError),
    #[error("mesh service failed before becoming ready: {0}")]
    MeshReady(#[source] MeshError),
    #[error("mesh service not ready after {0:?}")]
    MeshReadyTimeout(Duration),
    #[error("router stopped during startup")]
    StoppedDuringStartup,
    #[error("router did not stop within {0:?}")]
    StopTimeout(Duration),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("router is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: RouterState,
        actual: RouterState,
    },
}

/// Builds the transport once the mesh dialer exists.
pub type TransportFactory = Box<dyn Fn(Arc<dyn MeshDialer>) -> ProxyTransport + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    state: RouterState,
    listening: bool,
}

pub struct Router {
    config: RouterConfig,
    table: Arc<UpstreamTable>,
    registry: Arc<dyn ServiceRegistry>,
    mesh_factory: Arc<dyn MeshServiceFactory>,
    transport_factory: TransportFactory,
    lifecycle: watch::Sender<Lifecycle>,
    shutdown: Shutdown,
    mesh: OnceLock<Arc<dyn MeshService>>,
    forwarder: OnceLock<Arc<Forwarder>>,
}

impl Router {
    /// Parse the upstream table; nothing touches the network yet.
    pub fn new(
        config: RouterConfig,
        registry: Arc<dyn ServiceRegistry>,
        mesh_factory: Arc<dyn MeshServiceFactory>,
    ) -> Result<Self, RouterError> {
        let table = Arc::new(UpstreamTable::parse(&config.upstreams)?);
        for upstream in table.iter() {
            tracing::info!(
                service = %upstream.service,
                path = %upstream.path,
                connection_type = %upstream.connection_type,
                port = upstream.port,
                strip_prefix = %upstream.strip_prefix,
                "Upstream configured"
            );
        }

        let transport_config = config.transport.clone();
        let retry = RetryPolicy::from(&config.retries);
        let transport_factory: TransportFactory =
            Box::new(move |dialer| ProxyTransport::build(dialer, &transport_config, retry));

        let (lifecycle, _) = watch::channel(Lifecycle {
            state: RouterState::Created,
            listening: false,
        });

        Ok(Self {
            config,
            table,
            registry,
            mesh_factory,
            transport_factory,
            lifecycle,
            shutdown: Shutdown::new(),
            mesh: OnceLock::new(),
            forwarder: OnceLock::new(),
        })
    }

    /// Replace how the transport is built from the mesh dialer.
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = factory;
        self
    }

    pub fn state(&self) -> RouterState {
        self.lifecycle.borrow().state
    }

    pub fn table(&self) -> &UpstreamTable {
        &self.table
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Available once `run` has succeeded.
    pub fn forwarder(&self) -> Option<Arc<Forwarder>> {
        self.forwarder.get().cloned()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.config.shutdown.drain_timeout()
    }

    /// Register, start the mesh service and wait for it to be ready.
    pub async fn run(&self) -> Result<(), RouterError> {
        self.transition(RouterState::Created, RouterState::Registering)?;

        let name = self.config.consul.service_name.as_str();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            listen_addr = %self.config.listener.bind_address,
            service = %name,
            upstreams = self.table.len(),
            "Starting Connect Router"
        );

        let registered = self
            .unless_stopped(async { self.registry.register(name).await.map_err(RouterError::Registration) })
            .await;
        if let Err(err) = registered {
            self.finish();
            return Err(err);
        }

        let created = self
            .unless_stopped(async { self.mesh_factory.new_service(name).await.map_err(RouterError::MeshService) })
            .await;
        let mesh = match created {
            Ok(mesh) => mesh,
            Err(err) => {
                self.finish();
                return Err(err);
            }
        };
        let mesh = Arc::clone(self.mesh.get_or_init(|| mesh));

        self.transition(RouterState::Registering, RouterState::AwaitingMeshReady)?;
        tracing::info!(service = %name, "Waiting for mesh TLS material");

        if let Err(err) = self.await_ready(mesh.as_ref()).await {
            self.finish();
            return Err(err);
        }

        let dialer: Arc<dyn MeshDialer> = Arc::new(ServiceDialer(mesh));
        let transport = (self.transport_factory)(dialer);
        let forwarder = Forwarder::new(Arc::clone(&self.table), transport, self.config.mesh.domain.clone());
        let _ = self.forwarder.set(Arc::new(forwarder));

        self.transition(RouterState::AwaitingMeshReady, RouterState::Serving)?;
        if self.shutdown.is_triggered() {
            self.finish();
            return Err(RouterError::StoppedDuringStartup);
        }
        tracing::info!("Mesh ready, router is serving");
        Ok(())
    }

    async fn await_ready(&self, mesh: &dyn MeshService) -> Result<(), RouterError> {
        self.unless_stopped(async {
            match self.config.mesh.ready_timeout() {
                Some(limit) => tokio::time::timeout(limit, mesh.ready())
                    .await
                    .map_err(|_| RouterError::MeshReadyTimeout(limit))?
                    .map_err(RouterError::MeshReady),
                None => mesh.ready().await.map_err(RouterError::MeshReady),
            }
        })
        .await
    }

    /// Run a startup step, abandoning it as soon as `stop` is called.
    async fn unless_stopped<T>(&self, step: impl Future<Output = Result<T, RouterError>>) -> Result<T, RouterError> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown.triggered() => Err(RouterError::StoppedDuringStartup),
            result = step => result,
        }
    }

    /// Bind the configured address and serve until stopped.
    pub async fn listen_and_serve(&self) -> Result<(), RouterError> {
        let listener = Listener::bind(&self.config.listener).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until stopped.
    pub async fn serve(&self, listener: Listener) -> Result<(), RouterError> {
        let Some(forwarder) = self.forwarder() else {
            return Err(RouterError::InvalidState {
                expected: RouterState::Serving,
                actual: self.state(),
            });
        };

        let mut actual = RouterState::Serving;
        let claimed = self.lifecycle.send_if_modified(|lifecycle| {
            actual = lifecycle.state;
            if lifecycle.state == RouterState::Serving && !lifecycle.listening {
                lifecycle.listening = true;
                return true;
            }
            false
        });
        if !claimed {
            return Err(RouterError::InvalidState {
                expected: RouterState::Serving,
                actual,
            });
        }

        let result = serve(listener, build_app(forwarder), self.shutdown.subscribe()).await;
        self.finish();
        result.map_err(RouterError::from)
    }

    /// Stop accepting, drain in-flight requests until `deadline`, then
    /// force-close. Returns once the router is `Stopped`, or
    /// `StopTimeout` if it is not stopped shortly after the deadline.
    pub async fn stop(&self, deadline: Duration) -> Result<(), RouterError> {
        match self.state() {
            RouterState::Created => {
                return Err(RouterError::InvalidState {
                    expected: RouterState::Serving,
                    actual: RouterState::Created,
                })
            }
            RouterState::Stopped => return Ok(()),
            _ => {}
        }

        // Trigger before looking at `listening`: a concurrent `serve` either
        // sees the trigger or is seen here.
        if self.shutdown.trigger(deadline) {
            tracing::info!(deadline = ?deadline, "Stopping router");
        }

        let mut idle = false;
        self.lifecycle.send_if_modified(|lifecycle| {
            if lifecycle.state != RouterState::Serving {
                return false;
            }
            lifecycle.state = RouterState::Draining;
            idle = !lifecycle.listening;
            true
        });
        if idle {
            self.finish();
        }

        let limit = deadline + FORCE_CLOSE_GRACE;
        let mut lifecycle = self.lifecycle.subscribe();
        let stopped = lifecycle.wait_for(|lifecycle| lifecycle.state == RouterState::Stopped);
        let result = match tokio::time::timeout(limit, stopped).await {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::warn!(state = ?self.state(), limit = ?limit, "Router did not stop in time");
                Err(RouterError::StopTimeout(limit))
            }
        };
        result
    }

    fn transition(&self, from: RouterState, to: RouterState) -> Result<(), RouterError> {
        let mut actual = from;
        let moved = self.lifecycle.send_if_modified(|lifecycle| {
            if lifecycle.state != from {
                actual = lifecycle.state;
                return false;
            }
            lifecycle.state = to;
            true
        });

        if !moved {
            return Err(RouterError::InvalidState { expected: from, actual });
        }
        tracing::debug!(from = ?from, to = ?to, "Router state changed");
        Ok(())
    }

    fn finish(&self) {
        if let Some(mesh) = self.mesh.get() {
            mesh.close();
        }
        let stopped = self.lifecycle.send_if_modified(|lifecycle| {
            if lifecycle.state == RouterState::Stopped {
                return false;
            }
            lifecycle.state = RouterState::Stopped;
            lifecycle.listening = false;
            true
        });
        if stopped {
            tracing::info!("Router stopped");
        }
    }
}
