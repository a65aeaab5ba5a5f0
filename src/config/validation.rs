//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (backends reference declared proxies)
//! - Validate value ranges and addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::TunnelConfig;

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("proxy name must not be empty")]
    EmptyProxyName,

    #[error("duplicate proxy name {0}")]
    DuplicateProxy(String),

    #[error("duplicate backend id {0}")]
    DuplicateBackend(String),

    #[error("backend {backend} references unknown proxy {proxy}")]
    UnknownProxy { backend: String, proxy: String },

    #[error("invalid address {address} for {owner}")]
    InvalidAddress { owner: String, address: String },
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.proxy_queue_capacity == 0 {
        errors.push(ValidationError::Zero {
            field: "service.proxy_queue_capacity",
        });
    }
    if config.service.connection_queue_capacity == 0 {
        errors.push(ValidationError::Zero {
            field: "service.connection_queue_capacity",
        });
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.connect_secs",
        });
    }

    let mut proxies = HashSet::new();
    for proxy in &config.proxies {
        if proxy.name.is_empty() {
            errors.push(ValidationError::EmptyProxyName);
        } else if !proxies.insert(proxy.name.as_str()) {
            errors.push(ValidationError::DuplicateProxy(proxy.name.clone()));
        }
        if proxy.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                owner: format!("proxy {}", proxy.name),
                address: proxy.bind_address.clone(),
            });
        }
    }

    let mut backends = HashSet::new();
    for backend in &config.backends {
        if !backends.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }
        if !proxies.contains(backend.proxy.as_str()) {
            errors.push(ValidationError::UnknownProxy {
                backend: backend.id.clone(),
                proxy: backend.proxy.clone(),
            });
        }
        if backend.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                owner: format!("backend {}", backend.id),
                address: backend.address.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            owner: "metrics".to_string(),
            address: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
