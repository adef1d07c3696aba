//! Consul-backed mesh service.
//!
//! A background task keeps the client TLS config current: it fetches the
//! CA roots and this service's leaf certificate, publishes the config on a
//! watch channel, and refetches on an interval. `ready` waits for the
//! first publish.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::mesh::consul::ConsulClient;
use crate::mesh::{tls, MeshError, MeshService};
use crate::net::{BoxedMeshStream, MeshDialer};

const FETCH_RETRY_DELAY: Duration = Duration::from_secs(5);

type TlsState = Option<Arc<ClientConfig>>;

pub struct ConsulMeshService {
    name: String,
    client: ConsulClient,
    tls: watch::Receiver<TlsState>,
    refresher: JoinHandle<()>,
}

impl ConsulMeshService {
    /// Spawn the certificate refresher for `name`. Must be called inside a
    /// tokio runtime.
    pub fn start(client: ConsulClient, name: &str, refresh_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        let refresher = tokio::spawn(refresh_loop(client.clone(), name.to_string(), tx, refresh_interval));

        Self {
            name: name.to_string(),
            client,
            tls: rx,
            refresher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

async fn refresh_loop(client: ConsulClient, name: String, tx: watch::Sender<TlsState>, interval: Duration) {
    loop {
        let delay = match fetch_material(&client, &name).await {
            Ok(config) => {
                let first = tx.borrow().is_none();
                tx.send_replace(Some(config));
                tracing::info!(service = %name, first, "Mesh TLS material issued");
                interval
            }
            Err(err) => {
                tracing::warn!(service = %name, error = %err, "Failed to fetch mesh TLS material");
                FETCH_RETRY_DELAY
            }
        };
        tokio::time::sleep(delay).await;
    }
}

async fn fetch_material(client: &ConsulClient, name: &str) -> Result<Arc<ClientConfig>, MeshError> {
    let roots = client.ca_roots().await?;
    let leaf = client.leaf_cert(name).await?;
    tls::client_config(&roots, &leaf, client.domain())
}

impl MeshDialer for ConsulMeshService {
    fn dial_tls(&self, network: &str, address: &str) -> BoxFuture<'static, io::Result<BoxedMeshStream>> {
        let client = self.client.clone();
        let config = self.tls.borrow().clone();
        let network = network.to_string();
        let address = address.to_string();

        Box::pin(async move {
            if network != "tcp" {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported network `{network}`"),
                ));
            }
            let config = config.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "mesh TLS material not issued yet")
            })?;

            let host = address.rsplit_once(':').map_or(address.as_str(), |(host, _)| host);
            let service = tls::service_name(host, client.domain()).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("`{host}` is not under the {} mesh domain", client.domain()),
                )
            })?;

            let instances = client.connect_instances(service).await.map_err(io::Error::other)?;
            if instances.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no passing instances of {service}"),
                ));
            }
            let instance = &instances[fastrand::usize(..instances.len())];
            let (target_host, target_port) = instance.target();

            tracing::debug!(service, instance = %target_host, port = target_port, "Dialing mesh instance");
            let tcp = TcpStream::connect((target_host, target_port)).await?;

            let server_name = ServerName::try_from(host.to_string())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            let tls = TlsConnector::from(config).connect(server_name, tcp).await?;

            Ok(Box::new(tls) as BoxedMeshStream)
        })
    }
}

impl MeshService for ConsulMeshService {
    fn ready(&self) -> BoxFuture<'static, Result<(), MeshError>> {
        let mut tls = self.tls.clone();
        Box::pin(async move {
            let issued = tls.wait_for(|config| config.is_some()).await.map(|_| ());
            issued.map_err(|_| MeshError::Closed)
        })
    }

    fn close(&self) {
        self.refresher.abort();
    }
}

impl Drop for ConsulMeshService {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}
