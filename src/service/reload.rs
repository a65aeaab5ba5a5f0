//! Applying configuration to a service, at startup and on reload.
//!
//! # Responsibilities
//! - Register proxies that appear in the config
//! - Bind backends that appear, unbind backends that disappear or change
//! - Remember what was actually applied, so failed entries are retried on
//!   the next reload
//!
//! # Design Decisions
//! - Startup is a reload from an empty config
//! - Removing a proxy or moving its bind address needs a restart; such
//!   changes are logged and otherwise ignored

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;

use crate::config::{BackendConfig, TunnelConfig};
use crate::error::ServiceError;
use crate::lifecycle::Shutdown;
use crate::proxy::{Dialer, TcpDialer, TcpProxy};
use crate::service::Service;

/// What one call to [`Reloader::apply`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub proxies_added: Vec<String>,
    pub dialers_bound: Vec<String>,
    pub dialers_unbound: Vec<String>,
    pub errors: Vec<String>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Keeps a service in line with successive configs.
pub struct Reloader {
    service: Arc<Service>,
    current: ArcSwap<TunnelConfig>,
}

impl Reloader {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            current: ArcSwap::from_pointee(TunnelConfig::default()),
        }
    }

    /// The config as last applied.
    pub fn current(&self) -> Arc<TunnelConfig> {
        self.current.load_full()
    }

    /// Bring the service in line with `next`.
    pub async fn apply(&self, next: TunnelConfig) -> ReloadReport {
        let previous = self.current.load_full();
        let mut report = ReloadReport::default();
        let mut applied = next.clone();
        let connect_timeout = next.timeouts.connect();

        for entry in &previous.proxies {
            match next.proxies.iter().find(|p| p.name == entry.name) {
                None => tracing::warn!(proxy = %entry.name, "Proxy removed from config; restart to stop it"),
                Some(p) if p.bind_address != entry.bind_address => tracing::warn!(
                    proxy = %entry.name,
                    bind_address = %p.bind_address,
                    "Proxy bind address changed; restart to apply"
                ),
                Some(_) => {}
            }
        }

        let mut failed_proxies = Vec::new();
        for entry in &next.proxies {
            if self.service.registry().contains(&entry.name) {
                continue;
            }
            let result = match TcpProxy::from_config(entry).await {
                Ok(proxy) => self.service.add_proxy(Arc::new(proxy)).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => report.proxies_added.push(entry.name.clone()),
                Err(e) => {
                    tracing::error!(proxy = %entry.name, error = %e, "Failed to register proxy");
                    report.errors.push(format!("proxy {}: {}", entry.name, e));
                    failed_proxies.push(entry.name.clone());
                }
            }
        }
        applied.proxies.retain(|p| !failed_proxies.contains(&p.name));

        for backend in previous.backends.iter().filter(|b| !next.backends.contains(b)) {
            match self.unbind(backend, connect_timeout) {
                Ok(()) => report.dialers_unbound.push(backend.id.clone()),
                Err(e) => {
                    tracing::warn!(backend = %backend.id, error = %e, "Failed to unbind backend");
                    report.errors.push(format!("backend {}: {}", backend.id, e));
                }
            }
        }

        let mut failed_backends = Vec::new();
        for backend in next.backends.iter().filter(|b| !previous.backends.contains(b)) {
            match self.bind(backend, connect_timeout) {
                Ok(()) => report.dialers_bound.push(backend.id.clone()),
                Err(e) => {
                    tracing::error!(backend = %backend.id, error = %e, "Failed to bind backend");
                    report.errors.push(format!("backend {}: {}", backend.id, e));
                    failed_backends.push(backend.clone());
                }
            }
        }
        applied.backends.retain(|b| !failed_backends.contains(b));

        self.current.store(Arc::new(applied));

        tracing::info!(
            proxies_added = report.proxies_added.len(),
            dialers_bound = report.dialers_bound.len(),
            dialers_unbound = report.dialers_unbound.len(),
            errors = report.errors.len(),
            "Configuration applied"
        );
        report
    }

    /// Apply every update until shutdown or until the update stream ends.
    pub async fn run(self, mut updates: mpsc::UnboundedReceiver<TunnelConfig>, shutdown: Shutdown) {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => {
                        self.apply(config).await;
                    }
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }
        tracing::debug!("Config reloader stopped");
    }

    fn bind(&self, backend: &BackendConfig, connect_timeout: Duration) -> Result<(), ServiceError> {
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::from_config(backend, connect_timeout)?);
        self.service.bind_dialer(&backend.proxy, dialer)
    }

    fn unbind(&self, backend: &BackendConfig, connect_timeout: Duration) -> Result<(), ServiceError> {
        let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::from_config(backend, connect_timeout)?);
        self.service.unbind_dialer(&backend.proxy, &dialer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyEntry, ServiceConfig};
    use crate::observability::traffic::TrafficCounter;

    fn service() -> Arc<Service> {
        Arc::new(Service::new(&ServiceConfig::default(), Arc::new(TrafficCounter::new())))
    }

    fn config(backends: &[(&str, &str)]) -> TunnelConfig {
        TunnelConfig {
            proxies: vec![ProxyEntry {
                name: "ssh".into(),
                bind_address: "127.0.0.1:0".into(),
            }],
            backends: backends
                .iter()
                .map(|(id, address)| BackendConfig {
                    id: id.to_string(),
                    proxy: "ssh".into(),
                    address: address.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn startup_registers_and_binds() {
        let service = service();
        let reloader = Reloader::new(service.clone());

        let report = reloader.apply(config(&[("b1", "127.0.0.1:22")])).await;
        assert!(report.is_clean());
        assert_eq!(report.proxies_added, vec!["ssh".to_string()]);
        assert_eq!(report.dialers_bound, vec!["b1".to_string()]);
        assert_eq!(service.proxies().len(), 1);
    }

    #[tokio::test]
    async fn reload_rebinds_changed_backends() {
        let service = service();
        let reloader = Reloader::new(service.clone());
        reloader
            .apply(config(&[("b1", "127.0.0.1:22"), ("b2", "127.0.0.1:23")]))
            .await;

        let report = reloader
            .apply(config(&[("b1", "127.0.0.1:2222"), ("b3", "127.0.0.1:24")]))
            .await;

        assert!(report.is_clean(), "{:?}", report.errors);
        assert!(report.proxies_added.is_empty());
        assert_eq!(report.dialers_unbound, vec!["b1".to_string(), "b2".to_string()]);
        assert_eq!(report.dialers_bound, vec!["b1".to_string(), "b3".to_string()]);
        assert_eq!(reloader.current().backends.len(), 2);
    }

    #[tokio::test]
    async fn failed_backend_is_retried_next_time() {
        let service = service();
        let reloader = Reloader::new(service.clone());
        let mut first = config(&[]);
        first.backends.push(BackendConfig {
            id: "orphan".into(),
            proxy: "missing".into(),
            address: "127.0.0.1:22".into(),
        });

        let report = reloader.apply(first.clone()).await;
        assert_eq!(report.errors.len(), 1);
        assert!(reloader.current().backends.is_empty());

        let report = reloader.apply(first).await;
        assert_eq!(report.errors.len(), 1);
    }
}
