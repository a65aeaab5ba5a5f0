//! Service core.
//!
//! # Data Flow
//! ```text
//! add_proxy
//!     → registry.rs (insert-if-absent by name)
//!     → coordinator.rs (new-proxy event, when running)
//!     → listener.rs (one accept loop per proxy)
//!         → coordinator.rs (connection event)
//!         → dispatcher.rs (one task per connection → Proxy::handle)
//!
//! Listener accept error → coordinator → shutdown → start() returns it
//! Handler error → logged and counted, nothing else
//! ```
//!
//! # Design Decisions
//! - Only the event loop spawns tasks and tracks which proxies have listeners
//! - Channels between tasks are bounded; producers wait when they fill up
//! - A single level-triggered shutdown signal, observed cooperatively

pub mod coordinator;
pub mod dispatcher;
pub(crate) mod listener;
pub mod registry;
pub mod reload;

pub use coordinator::Service;
pub use dispatcher::{ConnectionId, DispatchTracker};
pub use registry::ProxyRegistry;
pub use reload::{ReloadReport, Reloader};
