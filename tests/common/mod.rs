//! Shared mocks and helpers for integration tests.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use tunnel_service::config::ServiceConfig;
use tunnel_service::observability::traffic::TrafficCounter;
use tunnel_service::{BoxConn, Dialer, Proxy, ProxyError, Service, ServiceError, Traffic};

/// A proxy whose accepts are fed by the test.
pub struct MockProxy {
    name: String,
    incoming_tx: mpsc::UnboundedSender<Result<BoxConn, ProxyError>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Result<BoxConn, ProxyError>>>,
    fail_handle: AtomicBool,
    pub accepts: AtomicUsize,
    pub closes: AtomicUsize,
    pub handled: AtomicUsize,
    pub binds: AtomicUsize,
}

#[allow(dead_code)]
impl MockProxy {
    pub fn new(name: &str) -> Arc<Self> {
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        Arc::new(Self {
            name: name.to_string(),
            incoming_tx,
            incoming: Mutex::new(incoming),
            fail_handle: AtomicBool::new(false),
            accepts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
            binds: AtomicUsize::new(0),
        })
    }

    /// A proxy whose handler always fails.
    pub fn failing(name: &str) -> Arc<Self> {
        let proxy = Self::new(name);
        proxy.fail_handle.store(true, Ordering::SeqCst);
        proxy
    }

    /// Simulate an inbound client that sends `payload` and hangs up.
    pub async fn connect(&self, payload: &[u8]) {
        let (conn, mut client) = tokio::io::duplex(1024);
        client.write_all(payload).await.unwrap();
        drop(client);
        let _ = self.incoming_tx.send(Ok(Box::new(conn) as BoxConn));
    }

    /// Make the next accept fail.
    pub fn fail_accept(&self, error: ProxyError) {
        let _ = self.incoming_tx.send(Err(error));
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Proxy for MockProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self) -> Result<BoxConn, ProxyError> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    fn close(&self) -> Result<(), ProxyError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bind(&self, _dialer: Arc<dyn Dialer>) -> Result<(), ProxyError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unbind(&self, dialer: &Arc<dyn Dialer>) -> Result<(), ProxyError> {
        Err(ProxyError::DialerNotBound {
            id: dialer.id().to_string(),
        })
    }

    async fn handle(&self, mut conn: BoxConn, traffic: Arc<dyn Traffic>) -> Result<(), ProxyError> {
        let mut buf = Vec::new();
        let read = conn.read_to_end(&mut buf).await?;
        traffic.inbound(&self.name, read as u64);
        self.handled.fetch_add(1, Ordering::SeqCst);

        if self.fail_handle.load(Ordering::SeqCst) {
            return Err(ProxyError::NoDialer {
                proxy: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A dialer that is never actually dialed.
#[derive(Debug)]
pub struct NullDialer;

#[async_trait]
impl Dialer for NullDialer {
    fn id(&self) -> &str {
        "null"
    }

    async fn dial(&self) -> Result<BoxConn, ProxyError> {
        Err(ProxyError::Closed)
    }
}

/// A fresh service with default queues and its traffic counter.
pub fn service() -> (Arc<Service>, Arc<TrafficCounter>) {
    let traffic = Arc::new(TrafficCounter::new());
    let service = Arc::new(Service::new(&ServiceConfig::default(), traffic.clone()));
    (service, traffic)
}

/// Run `start` on its own task.
pub fn spawn_start(service: &Arc<Service>) -> tokio::task::JoinHandle<Result<(), ServiceError>> {
    let service = service.clone();
    tokio::spawn(async move { service.start().await })
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `fut`, failing the test after two seconds.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}
