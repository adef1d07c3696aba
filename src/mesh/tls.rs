//! Client TLS configuration from Connect CA material.
//!
//! Mesh certificates carry a SPIFFE identity rather than DNS names. The chain
//! is verified against the mesh roots, a host name mismatch is tolerated, and
//! the end-entity certificate must then carry the URI SAN
//! `spiffe://<trust domain>/.../svc/<service>` for the service being dialed.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::mesh::consul::{CaRoots, LeafCert};
use crate::mesh::MeshError;

pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Build the client config presenting `leaf` and trusting only `roots`.
///
/// Servers are identified by the service encoded in the dialed host name
/// under `mesh_domain`.
pub fn client_config(roots: &CaRoots, leaf: &LeafCert, mesh_domain: &str) -> Result<Arc<ClientConfig>, MeshError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut store = RootCertStore::empty();
    for root in &roots.roots {
        for cert in parse_certs(&root.root_cert, "CA root")? {
            store.add(cert)?;
        }
    }
    if store.is_empty() {
        return Err(MeshError::NoRoots);
    }

    let chain = parse_certs(&leaf.cert_pem, "leaf certificate")?;
    let key = parse_key(&leaf.private_key_pem)?;

    let verifier = MeshVerifier::new(store, Arc::clone(&provider), &roots.trust_domain, mesh_domain)?;
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(chain, key)?;
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// `api.service.consul` under `service.consul` is `api`.
pub(crate) fn service_name<'a>(host: &'a str, domain: &str) -> Option<&'a str> {
    host.strip_suffix(domain)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|service| !service.is_empty())
}

fn parse_certs(pem: &str, what: &'static str) -> Result<Vec<CertificateDer<'static>>, MeshError> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| MeshError::Pem { what, source })
}

fn parse_key(pem: &str) -> Result<PrivateKeyDer<'static>, MeshError> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|source| MeshError::Pem {
            what: "private key",
            source,
        })?
        .ok_or(MeshError::MissingKey)
}

/// Whether `uri` names `service` in `trust_domain`. An empty trust domain
/// (agents that do not report one) matches any.
fn is_service_identity(uri: &str, trust_domain: &str, service: &str) -> bool {
    let Some((authority, path)) = uri.strip_prefix("spiffe://").and_then(|rest| rest.split_once('/')) else {
        return false;
    };
    if !trust_domain.is_empty() && !authority.eq_ignore_ascii_case(trust_domain) {
        return false;
    }
    path.strip_suffix(service)
        .is_some_and(|rest| rest == "svc/" || rest.ends_with("/svc/"))
}

/// WebPKI chain verification with the DNS name check replaced by a SPIFFE
/// service identity check.
#[derive(Debug)]
struct MeshVerifier {
    inner: Arc<WebPkiServerVerifier>,
    trust_domain: String,
    mesh_domain: String,
}

impl MeshVerifier {
    fn new(
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
        trust_domain: &str,
        mesh_domain: &str,
    ) -> Result<Self, MeshError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
        Ok(Self {
            inner,
            trust_domain: trust_domain.to_string(),
            mesh_domain: mesh_domain.to_string(),
        })
    }

    fn verify_identity(&self, end_entity: &CertificateDer<'_>, server_name: &ServerName<'_>) -> Result<(), rustls::Error> {
        let rejected = || rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure);

        let ServerName::DnsName(host) = server_name else {
            return Err(rejected());
        };
        let service = service_name(host.as_ref(), &self.mesh_domain).ok_or_else(rejected)?;

        let (_, cert) = X509Certificate::from_der(end_entity.as_ref())
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
        let san = cert
            .subject_alternative_name()
            .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

        let matched = san.is_some_and(|san| {
            san.value.general_names.iter().any(|name| match name {
                GeneralName::URI(uri) => is_service_identity(uri, &self.trust_domain, service),
                _ => false,
            })
        });
        if matched {
            Ok(())
        } else {
            tracing::warn!(service, "Upstream certificate does not carry the expected service identity");
            Err(rejected())
        }
    }
}

impl ServerCertVerifier for MeshVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(_)
            | Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => {}
            Err(err) => return Err(err),
        }
        self.verify_identity(end_entity, server_name)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
