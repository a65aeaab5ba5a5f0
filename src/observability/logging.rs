//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Log level comes from config; `RUST_LOG` overrides it when set

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter used by [`init`].
pub fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunnel_service={log_level},warn")))
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(log_level: &str) {
    let result = tracing_subscriber::registry()
        .with(filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
