//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Service::shutdown / listener failure / OS signal
//!     → signal flips once → listeners stop forwarding, event loop returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - One signal per service instance, never a process-wide global
//! - Cooperative: in-flight accepts and handlers are not interrupted

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
