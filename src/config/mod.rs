//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to startup, copied into subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the function registry and locality
//!   set are built from it exactly once
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::GatewayConfig;
pub use schema::GatewayMode;
pub use schema::ListenerConfig;
pub use schema::ClusterConfig;
pub use schema::SandboxConfig;
pub use schema::StreamingConfig;
pub use schema::ObservabilityConfig;
