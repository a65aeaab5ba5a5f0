//! Proxy endpoints and the collaborators they are built from.
//!
//! # Data Flow
//! ```text
//! Public client
//!     → Proxy::accept (one listener task per proxy)
//!     → Proxy::handle (one dispatch task per connection)
//!         → Dialer::dial (backend side of the tunnel)
//!         → bytes copied both ways, counted by Traffic
//! ```
//!
//! # Design Decisions
//! - The service core only sees the traits below; concrete proxies live in
//!   their own modules (tcp.rs)
//! - Connections are boxed so in-memory streams and sockets share one path
//! - Dialers and traffic sinks are passed through the core untouched

pub mod dialer;
mod metered;
pub mod tcp;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProxyError;

pub use dialer::TcpDialer;
pub use tcp::TcpProxy;

/// A bidirectional byte stream handed from `accept` to `handle`.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned connection as it travels between tasks.
pub type BoxConn = Box<dyn Conn>;

/// A named endpoint that accepts inbound connections and forwards them
/// through bound dialers.
#[async_trait]
pub trait Proxy: Send + Sync + 'static {
    /// Unique name used as the registry key.
    fn name(&self) -> &str;

    /// Wait for the next inbound connection.
    async fn accept(&self) -> Result<BoxConn, ProxyError>;

    /// Release the listening resource. Called once when the listener task exits.
    fn close(&self) -> Result<(), ProxyError>;

    /// Attach a backend dialer.
    fn bind(&self, dialer: Arc<dyn Dialer>) -> Result<(), ProxyError>;

    /// Detach a previously bound dialer.
    fn unbind(&self, dialer: &Arc<dyn Dialer>) -> Result<(), ProxyError>;

    /// Serve one accepted connection to completion.
    async fn handle(&self, conn: BoxConn, traffic: Arc<dyn Traffic>) -> Result<(), ProxyError>;
}

/// Factory for backend connections on the far side of a tunnel.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Identity used to match `bind` and `unbind`.
    fn id(&self) -> &str;

    async fn dial(&self) -> Result<BoxConn, ProxyError>;
}

/// Byte accounting sink.
pub trait Traffic: Send + Sync {
    /// Bytes received from the public client.
    fn inbound(&self, proxy: &str, bytes: u64);

    /// Bytes sent back to the public client.
    fn outbound(&self, proxy: &str, bytes: u64);
}

impl fmt::Debug for dyn Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy").field("name", &self.name()).finish()
    }
}
