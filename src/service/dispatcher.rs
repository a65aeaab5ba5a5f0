//! Per-connection dispatch.
//!
//! # Responsibilities
//! - Hand one accepted connection to its proxy's handler
//! - Give each dispatch a unique ID for tracing
//! - Count in-flight dispatches
//! - Contain handler failures: they are logged and counted, never escalated
//!
//! # Design Decisions
//! - No timeout is applied here; a handler that never returns keeps its task
//! - Retries and requeueing are the proxy's business, not the dispatcher's

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::Instrument;

use crate::observability::metrics;
use crate::proxy::{BoxConn, Proxy, Traffic};

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a dispatched connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts dispatch tasks that have not finished yet.
#[derive(Debug, Clone, Default)]
pub struct DispatchTracker {
    active: Arc<AtomicU64>,
}

impl DispatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new dispatch. The count drops again when the guard does.
    pub fn track(&self) -> DispatchGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        DispatchGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Tracks one dispatch for its whole lifetime, panics included.
#[derive(Debug)]
pub struct DispatchGuard {
    active: Arc<AtomicU64>,
    id: ConnectionId,
}

impl DispatchGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Dispatch finished");
    }
}

/// Run `proxy`'s handler on `conn`.
pub(crate) async fn dispatch(
    proxy: Arc<dyn Proxy>,
    conn: BoxConn,
    traffic: Arc<dyn Traffic>,
    guard: DispatchGuard,
) {
    let span = tracing::debug_span!("dispatch", proxy = %proxy.name(), connection_id = %guard.id());

    async move {
        metrics::record_dispatch(proxy.name());
        tracing::debug!("Dispatching connection");

        if let Err(error) = proxy.handle(conn, traffic).await {
            tracing::warn!(error = %error, "Connection handler failed");
            metrics::record_handler_error(proxy.name());
        }
        drop(guard);
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::observability::traffic::TrafficCounter;
    use crate::proxy::Dialer;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingProxy {
        handled: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Proxy for CountingProxy {
        fn name(&self) -> &str {
            "counting"
        }

        async fn accept(&self) -> Result<BoxConn, ProxyError> {
            Err(ProxyError::Closed)
        }

        fn close(&self) -> Result<(), ProxyError> {
            Ok(())
        }

        fn bind(&self, _dialer: Arc<dyn Dialer>) -> Result<(), ProxyError> {
            Ok(())
        }

        fn unbind(&self, _dialer: &Arc<dyn Dialer>) -> Result<(), ProxyError> {
            Ok(())
        }

        async fn handle(&self, _conn: BoxConn, traffic: Arc<dyn Traffic>) -> Result<(), ProxyError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            traffic.inbound(self.name(), 1);
            if self.fail {
                return Err(ProxyError::NoDialer {
                    proxy: self.name().to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.0 > id1.0);
    }

    #[test]
    fn tracker_counts() {
        let tracker = DispatchTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn handler_failure_is_contained() {
        let proxy = Arc::new(CountingProxy {
            handled: AtomicUsize::new(0),
            fail: true,
        });
        let traffic = Arc::new(TrafficCounter::new());
        let tracker = DispatchTracker::new();
        let (conn, _peer) = tokio::io::duplex(16);

        dispatch(proxy.clone(), Box::new(conn), traffic.clone(), tracker.track()).await;

        assert_eq!(proxy.handled.load(Ordering::SeqCst), 1);
        assert_eq!(traffic.get("counting").unwrap().inbound, 1);
        assert_eq!(tracker.active_count(), 0);
    }
}
