//! The coordinating event loop.
//!
//! # Responsibilities
//! - Own every channel and the shutdown signal of one service instance
//! - Start a listener task per registered proxy, including proxies added
//!   while running
//! - Start a dispatch task per accepted connection
//! - Stop everything on the first listener failure or on `shutdown`

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::proxy::{BoxConn, Dialer, Proxy, Traffic};
use crate::service::dispatcher::{self, DispatchTracker};
use crate::service::listener::{ListenerFailure, PendingConnection, ProxyListener};
use crate::service::registry::ProxyRegistry;

/// Receiving halves, handed to the event loop when it starts.
struct Inbox {
    proxies: mpsc::Receiver<Arc<dyn Proxy>>,
    connections: mpsc::Receiver<PendingConnection>,
    failures: mpsc::Receiver<ListenerFailure>,
}

/// A reverse-tunnel service: a set of named proxies plus the loop that
/// accepts and dispatches their connections.
///
/// Share it behind an `Arc`: one task runs [`Service::start`] while others
/// register proxies, bind dialers and eventually call [`Service::shutdown`].
pub struct Service {
    registry: ProxyRegistry,
    traffic: Arc<dyn Traffic>,
    proxy_tx: mpsc::Sender<Arc<dyn Proxy>>,
    conn_tx: mpsc::Sender<PendingConnection>,
    failure_tx: mpsc::Sender<ListenerFailure>,
    inbox: Mutex<Option<Inbox>>,
    running: AtomicBool,
    shutdown: Shutdown,
    dispatches: DispatchTracker,
}

impl Service {
    pub fn new(config: &ServiceConfig, traffic: Arc<dyn Traffic>) -> Self {
        let (proxy_tx, proxies) = mpsc::channel(config.proxy_queue_capacity.max(1));
        let (conn_tx, connections) = mpsc::channel(config.connection_queue_capacity.max(1));
        let (failure_tx, failures) = mpsc::channel(1);

        Self {
            registry: ProxyRegistry::new(),
            traffic,
            proxy_tx,
            conn_tx,
            failure_tx,
            inbox: Mutex::new(Some(Inbox {
                proxies,
                connections,
                failures,
            })),
            running: AtomicBool::new(false),
            shutdown: Shutdown::new(),
            dispatches: DispatchTracker::new(),
        }
    }

    /// Register a proxy. While the service runs its listener starts right away,
    /// otherwise it starts with [`Service::start`].
    ///
    /// Waits for room in the new-proxy queue when the loop is busy.
    pub async fn add_proxy(&self, proxy: Arc<dyn Proxy>) -> Result<(), ServiceError> {
        self.registry.add(proxy.clone())?;
        metrics::record_proxy_registered();
        tracing::info!(proxy = %proxy.name(), "Proxy registered");

        if self.running.load(Ordering::SeqCst) && self.proxy_tx.send(proxy).await.is_err() {
            tracing::debug!("Service stopped before the new proxy was picked up");
        }
        Ok(())
    }

    /// All registered proxies, in no particular order.
    pub fn proxies(&self) -> Vec<Arc<dyn Proxy>> {
        self.registry.list()
    }

    pub fn bind_dialer(&self, name: &str, dialer: Arc<dyn Dialer>) -> Result<(), ServiceError> {
        self.registry.bind_dialer(name, dialer)
    }

    pub fn unbind_dialer(&self, name: &str, dialer: &Arc<dyn Dialer>) -> Result<(), ServiceError> {
        self.registry.unbind_dialer(name, dialer)
    }

    /// Run the event loop until [`Service::shutdown`] or the first listener failure.
    ///
    /// Returns `Ok(())` on shutdown and the failing accept otherwise. A service
    /// runs at most once; later calls return [`ServiceError::AlreadyStarted`].
    pub async fn start(&self) -> Result<(), ServiceError> {
        let taken = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut inbox = taken.ok_or(ServiceError::AlreadyStarted)?;

        if self.shutdown.is_triggered() {
            tracing::info!("Shutdown requested before start");
            return Ok(());
        }

        // Publish `running` before the snapshot: a proxy registered in between
        // shows up in both places and `listening` ignores the second sighting.
        self.running.store(true, Ordering::SeqCst);
        let mut listening = HashSet::new();
        for proxy in self.registry.list() {
            self.spawn_listener(proxy, &mut listening);
        }
        tracing::info!(proxies = listening.len(), "Service started");

        let stopped = self.shutdown.wait();
        tokio::pin!(stopped);

        let result = loop {
            tokio::select! {
                Some(proxy) = inbox.proxies.recv() => {
                    self.spawn_listener(proxy, &mut listening);
                }
                Some((proxy, conn)) = inbox.connections.recv() => {
                    self.spawn_dispatcher(proxy, conn);
                }
                Some(failure) = inbox.failures.recv() => {
                    self.shutdown.trigger();
                    break Err(ServiceError::Accept {
                        proxy: failure.proxy,
                        source: failure.error,
                    });
                }
                _ = &mut stopped => {
                    break Ok(());
                }
            }
        };

        self.running.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => tracing::info!("Service stopped"),
            Err(e) => tracing::error!(error = %e, "Service stopped on listener failure"),
        }
        result
    }

    /// Ask every task to stop taking new work. Idempotent and non-blocking.
    pub fn shutdown(&self) {
        if self.shutdown.trigger() {
            tracing::info!("Shutdown requested");
        }
    }

    /// A handle on the shutdown signal, e.g. for an OS signal handler.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn traffic(&self) -> Arc<dyn Traffic> {
        self.traffic.clone()
    }

    /// Dispatch tasks that have not finished yet.
    pub fn active_connections(&self) -> u64 {
        self.dispatches.active_count()
    }

    fn spawn_listener(&self, proxy: Arc<dyn Proxy>, listening: &mut HashSet<String>) {
        if self.shutdown.is_triggered() {
            return;
        }
        if !listening.insert(proxy.name().to_string()) {
            tracing::debug!(proxy = %proxy.name(), "Listener already running");
            return;
        }

        let listener = ProxyListener::new(
            proxy,
            self.conn_tx.clone(),
            self.failure_tx.clone(),
            self.shutdown.clone(),
        );
        tokio::spawn(listener.run());
    }

    fn spawn_dispatcher(&self, proxy: Arc<dyn Proxy>, conn: BoxConn) {
        if self.shutdown.is_triggered() {
            tracing::debug!(proxy = %proxy.name(), "Shutdown observed, dropping queued connection");
            return;
        }

        let guard = self.dispatches.track();
        tokio::spawn(dispatcher::dispatch(proxy, conn, self.traffic.clone(), guard));
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("proxies", &self.registry.len())
            .field("running", &self.is_running())
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}
