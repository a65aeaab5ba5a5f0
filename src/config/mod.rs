//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → service::reload applies the difference to the running service
//! ```
//!
//! # Design Decisions
//! - All fields except proxy and backend entries have defaults
//! - Validation separates syntactic (serde) from semantic checks
//! - The service core never reads config files; it receives values

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BackendConfig, ObservabilityConfig, ProxyEntry, ServiceConfig, TimeoutConfig, TunnelConfig};
pub use validation::{validate_config, ValidationError};
