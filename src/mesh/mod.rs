//! Mesh collaborators.
//!
//! # Data Flow
//! ```text
//! Router::run
//!     → ServiceRegistry::register("connect-router")
//!     → MeshServiceFactory::new_service("connect-router")
//!     → MeshService::ready (TLS material issued)
//!     → ServiceDialer (MeshService as MeshDialer) → transport
//! ```
//!
//! The traits are the seams; `consul` is the agent-backed implementation.

pub mod consul;
pub mod service;
pub mod tls;

use std::io;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::net::{BoxedMeshStream, MeshDialer};

pub use consul::ConsulClient;
pub use service::ConsulMeshService;

/// Errors talking to the registry or building mesh TLS material.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid consul address `{address}`: {source}")]
    Address {
        address: String,
        #[source]
        source: url::ParseError,
    },
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid {what} PEM: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("leaf certificate has no private key")]
    MissingKey,
    #[error("no usable CA roots")]
    NoRoots,
    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),
    #[error("CA roots rejected: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
    #[error("mesh service closed before TLS material was issued")]
    Closed,
}

/// Announces this process to the service catalog.
pub trait ServiceRegistry: Send + Sync {
    fn register(&self, name: &str) -> BoxFuture<'static, Result<(), MeshError>>;
}

/// A live mesh identity that can dial other services.
pub trait MeshService: MeshDialer {
    /// Resolves once TLS material has been issued.
    fn ready(&self) -> BoxFuture<'static, Result<(), MeshError>>;

    fn close(&self);
}

pub trait MeshServiceFactory: Send + Sync {
    fn new_service(&self, name: &str) -> BoxFuture<'static, Result<Arc<dyn MeshService>, MeshError>>;
}

/// Hands a `MeshService` to the transport as a plain dialer.
pub struct ServiceDialer(pub Arc<dyn MeshService>);

impl MeshDialer for ServiceDialer {
    fn dial_tls(&self, network: &str, address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
        self.0.dial_tls(network, address)
    }
}
