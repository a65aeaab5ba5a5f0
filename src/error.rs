//! Error types shared by the service core and its collaborators.

use thiserror::Error;

/// Errors produced by a [`Proxy`](crate::proxy::Proxy) or a
/// [`Dialer`](crate::proxy::Dialer).
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Underlying socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy was closed and will not accept again.
    #[error("proxy closed")]
    Closed,

    /// A connection arrived but no dialer is bound to complete the tunnel.
    #[error("no dialer bound to proxy {proxy}")]
    NoDialer { proxy: String },

    #[error("dialer {id} already bound")]
    DialerAlreadyBound { id: String },

    #[error("dialer {id} not bound")]
    DialerNotBound { id: String },

    /// Backend dial did not complete in time.
    #[error("dial to {address} timed out")]
    Timeout { address: String },
}

/// Errors returned by the service surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A proxy with this name is already registered.
    #[error("proxy {name} already exists")]
    AlreadyExists { name: String },

    /// No proxy is registered under this name.
    #[error("invalid proxy {name}")]
    InvalidProxy { name: String },

    /// The proxy rejected a bind or unbind.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// A listener's accept failed; the whole service stops.
    #[error("accept failed on proxy {proxy}: {source}")]
    Accept {
        proxy: String,
        #[source]
        source: ProxyError,
    },

    /// `start` was called on a service that already ran.
    #[error("service already started")]
    AlreadyStarted,
}
