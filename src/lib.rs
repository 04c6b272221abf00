//! HTTP gateway that runs sandboxed WebAssembly functions on a cluster of
//! worker localities, in bulk or streaming mode.

pub mod cluster;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod sandbox;

pub use config::schema::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
