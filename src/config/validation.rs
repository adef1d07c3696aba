//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Upstream syntax is checked by the routing table, not here

use thiserror::Error;

use crate::config::schema::RouterConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let bind = config.listener.bind_target();
    match bind.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => {}
        _ => errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not host:port", config.listener.bind_address),
        )),
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.consul.address.trim().is_empty() {
        errors.push(ValidationError::new("consul.address", "must not be empty"));
    }
    if config.consul.service_name.trim().is_empty() {
        errors.push(ValidationError::new("consul.service_name", "must not be empty"));
    }

    if config.mesh.domain.trim().is_empty() || config.mesh.domain.starts_with('.') {
        errors.push(ValidationError::new(
            "mesh.domain",
            "must be a domain without a leading dot",
        ));
    }
    if config.mesh.refresh_interval_secs == 0 {
        errors.push(ValidationError::new("mesh.refresh_interval_secs", "must be greater than 0"));
    }

    let transport = &config.transport;
    for (field, value) in [
        ("transport.tls_handshake_timeout_secs", transport.tls_handshake_timeout_secs),
        ("transport.idle_timeout_secs", transport.idle_timeout_secs),
        ("transport.request_timeout_secs", transport.request_timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    if let Some(addr) = &config.observability.metrics_address {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "observability.metrics_address",
                format!("`{addr}` is not a socket address"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RouterConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.consul.service_name = " ".into();
        config.mesh.domain = ".consul".into();
        config.retries.max_attempts = 0;
        config.observability.metrics_address = Some("metrics".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "listener.bind_address",
                "consul.service_name",
                "mesh.domain",
                "retries.max_attempts",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = RouterConfig::default();
        config.transport.tls_handshake_timeout_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            [ValidationError::new("transport.tls_handshake_timeout_secs", "must be greater than 0")]
        );
    }
}
