//! Reverse-tunnel proxy service core.
//!
//! A [`Service`] keeps a set of named proxies, runs one accept loop per proxy
//! and hands every accepted connection to its proxy's handler on a task of
//! its own. A failing accept stops the whole service; a failing handler only
//! ends its own connection.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod service;

pub use config::TunnelConfig;
pub use error::{ProxyError, ServiceError};
pub use lifecycle::Shutdown;
pub use proxy::{BoxConn, Conn, Dialer, Proxy, Traffic};
pub use service::Service;
