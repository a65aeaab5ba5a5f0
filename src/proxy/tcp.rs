//! TCP proxy endpoint.
//!
//! # Responsibilities
//! - Own the public TCP listener for one named proxy
//! - Keep the set of bound backend dialers
//! - Pick a dialer round-robin per connection and splice the two streams
//! - Report byte counts to the traffic sink

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::config::ProxyEntry;
use crate::error::ProxyError;
use crate::lifecycle::Shutdown;
use crate::proxy::metered::Metered;
use crate::proxy::{BoxConn, Dialer, Proxy, Traffic};

/// A proxy that accepts plain TCP clients and forwards them to a bound dialer.
pub struct TcpProxy {
    name: String,
    local_addr: SocketAddr,
    listener: RwLock<Option<Arc<TcpListener>>>,
    closed: Shutdown,
    dialers: RwLock<Vec<Arc<dyn Dialer>>>,
    counter: AtomicUsize,
}

impl TcpProxy {
    /// Bind the public listener.
    pub async fn bind_addr(name: impl Into<String>, addr: SocketAddr) -> Result<Self, ProxyError> {
        let name = name.into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!(proxy = %name, address = %local_addr, "Proxy listener bound");

        Ok(Self {
            name,
            local_addr,
            listener: RwLock::new(Some(Arc::new(listener))),
            closed: Shutdown::new(),
            dialers: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
        })
    }

    /// Bind the listener described by a config entry.
    pub async fn from_config(entry: &ProxyEntry) -> Result<Self, ProxyError> {
        let addr: SocketAddr = entry.bind_address.parse().map_err(|e| {
            ProxyError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        Self::bind_addr(entry.name.clone(), addr).await
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of dialers currently bound.
    pub fn dialer_count(&self) -> usize {
        self.dialers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_dialer(&self) -> Option<Arc<dyn Dialer>> {
        let dialers = self.dialers.read().unwrap_or_else(PoisonError::into_inner);
        if dialers.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % dialers.len();
        Some(dialers[index].clone())
    }

    fn current_listener(&self) -> Option<Arc<TcpListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Proxy for TcpProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self) -> Result<BoxConn, ProxyError> {
        let listener = match self.current_listener() {
            Some(listener) if !self.closed.is_triggered() => listener,
            _ => return Err(ProxyError::Closed),
        };

        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                // Only the listener itself failing is fatal; a bad client socket is not.
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(proxy = %self.name, peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                }
                tracing::debug!(proxy = %self.name, peer_addr = %peer_addr, "Connection accepted");
                Ok(Box::new(stream) as BoxConn)
            }
            _ = self.closed.wait() => Err(ProxyError::Closed),
        }
    }

    fn close(&self) -> Result<(), ProxyError> {
        if self.closed.trigger() {
            self.listener
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            tracing::info!(proxy = %self.name, "Proxy closed");
        }
        Ok(())
    }

    fn bind(&self, dialer: Arc<dyn Dialer>) -> Result<(), ProxyError> {
        let mut dialers = self.dialers.write().unwrap_or_else(PoisonError::into_inner);
        if dialers.iter().any(|d| d.id() == dialer.id()) {
            return Err(ProxyError::DialerAlreadyBound {
                id: dialer.id().to_string(),
            });
        }
        tracing::info!(proxy = %self.name, dialer = %dialer.id(), "Dialer bound");
        dialers.push(dialer);
        Ok(())
    }

    fn unbind(&self, dialer: &Arc<dyn Dialer>) -> Result<(), ProxyError> {
        let mut dialers = self.dialers.write().unwrap_or_else(PoisonError::into_inner);
        let before = dialers.len();
        dialers.retain(|d| d.id() != dialer.id());
        if dialers.len() == before {
            return Err(ProxyError::DialerNotBound {
                id: dialer.id().to_string(),
            });
        }
        tracing::info!(proxy = %self.name, dialer = %dialer.id(), "Dialer unbound");
        Ok(())
    }

    async fn handle(&self, conn: BoxConn, traffic: Arc<dyn Traffic>) -> Result<(), ProxyError> {
        let dialer = self.next_dialer().ok_or_else(|| ProxyError::NoDialer {
            proxy: self.name.clone(),
        })?;
        let mut backend = dialer.dial().await?;

        // Counted on the client side so bytes relayed before an error still get reported.
        let mut client = Metered::new(conn);
        let result = tokio::io::copy_bidirectional(&mut client, &mut backend).await;
        let (bytes_in, bytes_out) = (client.bytes_read(), client.bytes_written());
        traffic.inbound(&self.name, bytes_in);
        traffic.outbound(&self.name, bytes_out);

        tracing::debug!(
            proxy = %self.name,
            dialer = %dialer.id(),
            bytes_in,
            bytes_out,
            "Connection finished"
        );
        result?;
        Ok(())
    }
}
