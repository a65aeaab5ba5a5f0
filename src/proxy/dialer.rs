//! TCP backend dialer.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::BackendConfig;
use crate::error::ProxyError;
use crate::proxy::{BoxConn, Dialer};

/// Dials a fixed backend address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    id: String,
    address: SocketAddr,
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(id: impl Into<String>, address: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            id: id.into(),
            address,
            connect_timeout,
        }
    }

    /// Build a dialer from a validated backend entry.
    pub fn from_config(config: &BackendConfig, connect_timeout: Duration) -> Result<Self, ProxyError> {
        let address = config.address.parse().map_err(|e| {
            ProxyError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        Ok(Self::new(config.id.clone(), address, connect_timeout))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn dial(&self) -> Result<BoxConn, ProxyError> {
        let stream = match time::timeout(self.connect_timeout, TcpStream::connect(self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProxyError::Io(e)),
            Err(_) => {
                return Err(ProxyError::Timeout {
                    address: self.address.to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;

        tracing::trace!(dialer = %self.id, address = %self.address, "Backend dialed");
        Ok(Box::new(stream))
    }
}
