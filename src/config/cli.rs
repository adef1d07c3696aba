//! Command line flags.
//!
//! Every flag is optional so values from a config file survive unless
//! explicitly overridden. The environment variables match the ones used by
//! event-driven deployments (`CONSUL_ADDR`, `UPSTREAMS`, `LOG_LEVEL`).

use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::{LogFormat, LogLevel, RouterConfig};

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "connect-router", version)]
#[command(about = "Path based reverse proxy for Consul Connect services", long_about = None)]
pub struct Cli {
    /// Address of the Consul agent.
    #[arg(long = "consul-addr", alias = "consul_addr", env = "CONSUL_ADDR")]
    pub consul_addr: Option<String>,

    /// Upstream definition, repeatable: service=<name>#path=<prefix>#type=<http|grpc>#port=<n>
    #[arg(long = "upstream", env = "UPSTREAMS", value_delimiter = ',')]
    pub upstreams: Vec<String>,

    /// Listen address, e.g. localhost:8181 or :8181.
    #[arg(long)]
    pub listen: Option<String>,

    #[arg(long = "log-level", env = "LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    #[arg(long = "log-format", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr")]
    pub metrics_addr: Option<String>,

    /// TOML config file; flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Overlay flags onto a loaded config.
    pub fn apply(&self, config: &mut RouterConfig) {
        if let Some(addr) = &self.consul_addr {
            config.consul.address = addr.clone();
        }
        if !self.upstreams.is_empty() {
            config.upstreams = self.upstreams.clone();
        }
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if let Some(addr) = &self.metrics_addr {
            config.observability.metrics_address = Some(addr.clone());
        }
    }
}
