//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Service core and proxies produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges)
//!     → traffic.rs (per-proxy byte accounting)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Handler failures surface here instead of reaching the coordinator
//! - Metric updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops, which keeps tests quiet

pub mod logging;
pub mod metrics;
pub mod traffic;
