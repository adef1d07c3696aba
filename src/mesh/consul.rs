//! Consul agent HTTP API.
//!
//! # Responsibilities
//! - Register this process as a catalog service
//! - Fetch Connect CA roots and the leaf certificate for a service
//! - List passing Connect-capable instances of an upstream
//!
//! Requests go to the local agent; an ACL token, when configured, rides
//! in `X-Consul-Token`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ConsulConfig, MeshConfig};
use crate::mesh::service::ConsulMeshService;
use crate::mesh::{MeshError, MeshService, MeshServiceFactory, ServiceRegistry};

const TOKEN_HEADER: &str = "X-Consul-Token";
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the local Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    domain: String,
    refresh_interval: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Registration<'a> {
    name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaRoots {
    #[serde(default)]
    pub trust_domain: String,
    #[serde(default)]
    pub roots: Vec<CaRoot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaRoot {
    pub root_cert: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeafCert {
    #[serde(rename = "CertPEM")]
    pub cert_pem: String,
    #[serde(rename = "PrivateKeyPEM")]
    pub private_key_pem: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub node: Node,
    pub service: AgentService,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

impl ServiceEntry {
    /// Dial target; the service address falls back to the node's.
    pub fn target(&self) -> (&str, u16) {
        let host = if self.service.address.is_empty() {
            self.node.address.as_str()
        } else {
            self.service.address.as_str()
        };
        (host, self.service.port)
    }
}

impl ConsulClient {
    pub fn new(consul: &ConsulConfig, mesh: &MeshConfig) -> Result<Self, MeshError> {
        let base = agent_url(&consul.address)?;
        let http = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;

        Ok(Self {
            http,
            base,
            token: consul.token.clone(),
            domain: mesh.domain.clone(),
            refresh_interval: mesh.refresh_interval(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, MeshError> {
        let url = self.base.join(path).map_err(|source| MeshError::Address {
            address: format!("{}{path}", self.base),
            source,
        })?;
        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        Ok(request)
    }

    pub async fn register_service(&self, name: &str) -> Result<(), MeshError> {
        self.request(Method::PUT, "v1/agent/service/register")?
            .json(&Registration { name })
            .send()
            .await?
            .error_for_status()?;
        tracing::info!(service = %name, "Registered service with Consul");
        Ok(())
    }

    pub async fn ca_roots(&self) -> Result<CaRoots, MeshError> {
        let roots = self
            .request(Method::GET, "v1/agent/connect/ca/roots")?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(roots)
    }

    pub async fn leaf_cert(&self, service: &str) -> Result<LeafCert, MeshError> {
        let leaf = self
            .request(Method::GET, &format!("v1/agent/connect/ca/leaf/{service}"))?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(leaf)
    }

    /// Passing instances that accept Connect traffic for `service`.
    pub async fn connect_instances(&self, service: &str) -> Result<Vec<ServiceEntry>, MeshError> {
        let entries = self
            .request(Method::GET, &format!("v1/health/connect/{service}"))?
            .query(&[("passing", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries)
    }
}

impl ServiceRegistry for ConsulClient {
    fn register(&self, name: &str) -> BoxFuture<'static, Result<(), MeshError>> {
        let client = self.clone();
        let name = name.to_string();
        Box::pin(async move { client.register_service(&name).await })
    }
}

impl MeshServiceFactory for ConsulClient {
    fn new_service(&self, name: &str) -> BoxFuture<'static, Result<Arc<dyn MeshService>, MeshError>> {
        let service = ConsulMeshService::start(self.clone(), name, self.refresh_interval);
        Box::pin(async move { Ok(Arc::new(service) as Arc<dyn MeshService>) })
    }
}

/// Agent addresses are often given bare (`127.0.0.1:8500`); default to http.
fn agent_url(address: &str) -> Result<Url, MeshError> {
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    let mut url = Url::parse(&with_scheme).map_err(|source| MeshError::Address {
        address: address.to_string(),
        source,
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
