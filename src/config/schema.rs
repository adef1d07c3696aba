//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Inbound listener settings.
    pub listener: ListenerConfig,

    /// Consul agent used for registration and mesh material.
    pub consul: ConsulConfig,

    /// Mesh naming and readiness.
    pub mesh: MeshConfig,

    /// Upstream definitions, `service=<name>#path=<prefix>#...`.
    pub upstreams: Vec<String>,

    /// Outbound HTTP client tuning.
    pub transport: TransportConfig,

    /// Retry budget for transport failures.
    pub retries: RetryConfig,

    pub shutdown: ShutdownConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8181"). A leading ':' means all interfaces.
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// Address handed to the socket layer, with `:port` expanded to all interfaces.
    pub fn bind_target(&self) -> String {
        match self.bind_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.bind_address.clone(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: ":8181".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Consul agent connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agent HTTP address (e.g., "http://127.0.0.1:8500").
    pub address: String,

    /// Name this process registers and is identified as in the mesh.
    pub service_name: String,

    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            service_name: "connect-router".to_string(),
            token: None,
        }
    }
}

/// Mesh settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    /// Domain appended to service names to form destination hosts.
    pub domain: String,

    /// Give up waiting for TLS material after this many seconds. Unset waits forever.
    pub ready_timeout_secs: Option<u64>,

    /// How often certificate material is re-fetched from the agent.
    pub refresh_interval_secs: u64,
}

impl MeshConfig {
    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            domain: "service.consul".to_string(),
            ready_timeout_secs: None,
            refresh_interval_secs: 3600,
        }
    }
}

/// Outbound client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub tls_handshake_timeout_secs: u64,

    /// Upper bound for `max_idle_per_host`. The pool has no cross-host
    /// idle limit, so this is not a total across upstreams.
    pub max_idle_connections: usize,

    /// Idle pooled connections kept per upstream host.
    pub max_idle_per_host: usize,

    pub idle_timeout_secs: u64,

    /// Deadline for a single attempt to produce a response.
    pub request_timeout_secs: u64,
}

impl TransportConfig {
    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Effective per-host idle cap: `max_idle_per_host` clamped to
    /// `max_idle_connections`.
    pub fn idle_per_host(&self) -> usize {
        self.max_idle_per_host.min(self.max_idle_connections)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls_handshake_timeout_secs: 20,
            max_idle_connections: 20,
            max_idle_per_host: 10,
            idle_timeout_secs: 120,
            request_timeout_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Constant wait between attempts, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may drain before connections are closed.
    pub drain_timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: LogLevel,

    pub log_format: LogFormat,

    /// Stream the log lines go to.
    pub log_output: LogOutput,

    /// Address for the Prometheus scrape endpoint (e.g., "0.0.0.0:9102").
    pub metrics_address: Option<String>,
}

/// Log verbosity selector.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    /// Keeps stdout free for a data protocol.
    Stderr,
}
