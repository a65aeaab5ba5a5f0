//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Event loop settings.
    pub service: ServiceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Public proxy endpoints.
    pub proxies: Vec<ProxyEntry>,

    /// Backends bound to proxies as dialers.
    pub backends: Vec<BackendConfig>,
}

/// Event loop settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Capacity of the new-proxy queue.
    pub proxy_queue_capacity: usize,

    /// Capacity of the accepted-connection queue. Listeners wait when it is full.
    pub connection_queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            proxy_queue_capacity: 16,
            connection_queue_capacity: 16,
        }
    }
}

/// A public endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProxyEntry {
    /// Unique proxy name.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:2222").
    pub bind_address: String,
}

/// A backend reachable through a proxy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Unique backend identifier, also the dialer ID.
    pub id: String,

    /// Name of the proxy this backend serves.
    pub proxy: String,

    /// Backend address (e.g., "127.0.0.1:22").
    pub address: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connect_secs: 5 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
