//! Per-proxy accept loop.
//!
//! # Responsibilities
//! - Accept connections from one proxy, in order
//! - Forward each accepted connection to the coordinator
//! - Report a failed accept to the coordinator as fatal
//! - Close the proxy exactly once on every exit path
//!
//! # Design Decisions
//! - Shutdown is checked after a successful accept, not during it. A
//!   connection accepted while shutdown is in progress is dropped instead of
//!   forwarded; nothing else is lost or leaked.
//! - Forwarding waits for room in the bounded connection channel, which
//!   slows accepting down when dispatch falls behind

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::proxy::{BoxConn, Proxy};

/// An accepted connection paired with the proxy that produced it.
pub(crate) type PendingConnection = (Arc<dyn Proxy>, BoxConn);

/// Terminal accept error reported by a listener.
#[derive(Debug)]
pub(crate) struct ListenerFailure {
    pub proxy: String,
    pub error: ProxyError,
}

/// The long-lived task driving one proxy's accept loop.
pub(crate) struct ProxyListener {
    proxy: Arc<dyn Proxy>,
    connections: mpsc::Sender<PendingConnection>,
    failures: mpsc::Sender<ListenerFailure>,
    shutdown: Shutdown,
}

impl ProxyListener {
    pub(crate) fn new(
        proxy: Arc<dyn Proxy>,
        connections: mpsc::Sender<PendingConnection>,
        failures: mpsc::Sender<ListenerFailure>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            proxy,
            connections,
            failures,
            shutdown,
        }
    }

    pub(crate) async fn run(self) {
        let guard = CloseOnExit::new(self.proxy.clone());
        let failure = self.accept_loop().await;

        // Close before reporting so the proxy is released by the time the
        // coordinator acts on the failure.
        drop(guard);

        if let Some(error) = failure {
            let failure = ListenerFailure {
                proxy: self.proxy.name().to_string(),
                error,
            };
            if self.failures.send(failure).await.is_err() {
                tracing::debug!(proxy = %self.proxy.name(), "Coordinator gone, accept failure dropped");
            }
        }
    }

    /// Returns the accept error that ended the loop, if any.
    async fn accept_loop(&self) -> Option<ProxyError> {
        let name = self.proxy.name();
        tracing::info!(proxy = %name, "Listener started");

        loop {
            match self.proxy.accept().await {
                Ok(conn) => {
                    if self.shutdown.is_triggered() {
                        tracing::debug!(proxy = %name, "Shutdown observed, dropping accepted connection");
                        return None;
                    }
                    if self.connections.send((self.proxy.clone(), conn)).await.is_err() {
                        tracing::debug!(proxy = %name, "Coordinator gone, listener exiting");
                        return None;
                    }
                }
                Err(error) => {
                    tracing::error!(proxy = %name, error = %error, "Accept failed");
                    metrics::record_listener_failure(name);
                    return Some(error);
                }
            }
        }
    }
}

/// Closes the proxy when dropped, including on panic.
struct CloseOnExit {
    proxy: Arc<dyn Proxy>,
}

impl CloseOnExit {
    fn new(proxy: Arc<dyn Proxy>) -> Self {
        metrics::listener_started();
        Self { proxy }
    }
}

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Err(e) = self.proxy.close() {
            tracing::warn!(proxy = %self.proxy.name(), error = %e, "Failed to close proxy");
        }
        metrics::listener_stopped();
        tracing::info!(proxy = %self.proxy.name(), "Listener stopped");
    }
}
