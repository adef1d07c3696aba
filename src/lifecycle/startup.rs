//! Startup orchestration.
//!
//! Config first, then logging and metrics, then the Consul-backed router.
//! Any failure here is fatal; nothing has been registered yet.

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{loader, Cli, ConfigError, ObservabilityConfig, RouterConfig};
use crate::lifecycle::{Router, RouterError};
use crate::mesh::{ConsulClient, MeshError};
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("invalid metrics address: {0}")]
    MetricsAddress(#[from] AddrParseError),
    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("unable to create consul client: {0}")]
    Consul(#[from] MeshError),
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Install the tracing subscriber and, when configured, the metrics exporter.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), StartupError> {
    logging::init(config)?;

    if let Some(address) = &config.metrics_address {
        let address: SocketAddr = address.parse()?;
        metrics::init_metrics(address)?;
    }
    Ok(())
}

/// A router backed by the Consul agent named in `config`.
pub fn consul_router(config: RouterConfig) -> Result<Router, StartupError> {
    let consul = Arc::new(ConsulClient::new(&config.consul, &config.mesh)?);
    let router = Router::new(config, consul.clone(), consul)?;
    Ok(router)
}

/// Resolve config from flags, set up observability and build the router.
/// The router still has to be `run`.
pub fn prepare(cli: &Cli) -> Result<Router, StartupError> {
    start(loader::from_cli(cli)?)
}

/// Set up observability for an already resolved config and build the router.
pub fn start(config: RouterConfig) -> Result<Router, StartupError> {
    init_observability(&config.observability)?;
    consul_router(config)
}
