//! Upstream definitions and their flag syntax.
//!
//! An upstream is written as `#`-separated `key=value` pairs:
//!
//! ```text
//! service=payments#path=/api/payments#type=grpc#port=9090#strip_prefix=/api
//! ```
//!
//! `service` and `path` are required. Unknown keys are ignored with a warning
//! so newer flags do not break older routers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Port used when an upstream does not name one.
pub const DEFAULT_UPSTREAM_PORT: u16 = 8080;

/// Errors produced while parsing upstream definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("upstream `{spec}` is missing required key `service`")]
    MissingService { spec: String },

    #[error("upstream `{spec}` is missing required key `path`")]
    MissingPath { spec: String },

    #[error("upstream `{spec}` has invalid port `{value}`")]
    InvalidPort { spec: String, value: String },

    #[error("upstream `{spec}` has unknown type `{value}` (expected http or grpc)")]
    InvalidType { spec: String, value: String },

    #[error("upstream `{spec}` has path `{value}` which does not start with `/`")]
    InvalidPath { spec: String, value: String },

    #[error("upstream `{spec}` has service `{value}` which is not a valid DNS label")]
    InvalidService { spec: String, value: String },

    #[error("upstream `{spec}` has malformed pair `{pair}` (expected key=value)")]
    MalformedPair { spec: String, pair: String },
}

/// Wire protocol spoken by an upstream.
///
/// Both variants ride the same mesh TLS stream, so forwarding does not branch
/// on this. It is kept for logging and future protocol specific handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Http,
    Grpc,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Http => "http",
            ConnectionType::Grpc => "grpc",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ConnectionType::Http),
            "grpc" => Ok(ConnectionType::Grpc),
            _ => Err(()),
        }
    }
}

/// A routing rule: requests whose path starts with `path` go to `service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Logical mesh service name. Never dialed directly, always resolved by the mesh.
    pub service: String,
    /// Route prefix, always starts with `/`.
    pub path: String,
    pub connection_type: ConnectionType,
    /// Parsed and kept for visibility; forwarding strips `path` instead.
    pub strip_prefix: String,
    pub port: u16,
}

impl Upstream {
    /// Create an HTTP upstream with default port and no strip prefix.
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            connection_type: ConnectionType::Http,
            strip_prefix: String::new(),
            port: DEFAULT_UPSTREAM_PORT,
        }
    }

    /// Parse a single `key=value#key=value` definition.
    pub fn parse(spec: &str) -> Result<Self, ParseError> {
        let mut service = None;
        let mut path = None;
        let mut connection_type = ConnectionType::Http;
        let mut strip_prefix = String::new();
        let mut port = DEFAULT_UPSTREAM_PORT;

        for pair in spec.split('#').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| ParseError::MalformedPair {
                spec: spec.to_string(),
                pair: pair.to_string(),
            })?;
            let value = value.trim();

            match key.trim() {
                "service" => service = Some(value.to_string()),
                "path" => path = Some(value.to_string()),
                "type" => {
                    connection_type = value.parse().map_err(|_| ParseError::InvalidType {
                        spec: spec.to_string(),
                        value: value.to_string(),
                    })?;
                }
                "port" => {
                    port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| ParseError::InvalidPort {
                            spec: spec.to_string(),
                            value: value.to_string(),
                        })?;
                }
                "strip_prefix" => strip_prefix = value.to_string(),
                other => {
                    tracing::warn!(spec = %spec, key = %other, "Ignoring unknown upstream key");
                }
            }
        }

        let service = service
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::MissingService { spec: spec.to_string() })?;
        let path = path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ParseError::MissingPath { spec: spec.to_string() })?;

        if !is_dns_name(&service) {
            return Err(ParseError::InvalidService {
                spec: spec.to_string(),
                value: service,
            });
        }
        if !path.starts_with('/') {
            return Err(ParseError::InvalidPath {
                spec: spec.to_string(),
                value: path,
            });
        }

        Ok(Self {
            service,
            path,
            connection_type,
            strip_prefix,
            port,
        })
    }
}

impl FromStr for Upstream {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "service={}#path={}#type={}#port={}",
            self.service, self.path, self.connection_type, self.port
        )?;
        if !self.strip_prefix.is_empty() {
            write!(f, "#strip_prefix={}", self.strip_prefix)?;
        }
        Ok(())
    }
}

// The service name becomes the leftmost labels of the destination host.
fn is_dns_name(name: &str) -> bool {
    name.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}
