//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Execution discipline served by this gateway.
    pub mode: GatewayMode,

    /// Where compiled functions are loaded from.
    pub registry: RegistryConfig,

    /// Worker nodes that host sandbox instances.
    pub cluster: ClusterConfig,

    /// Guest memory handoff settings.
    pub sandbox: SandboxConfig,

    /// Buffer sizes for the streaming pumps.
    pub streaming: StreamingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Thread pools.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:32425").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:32425".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Execution discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Whole body in, whole body out.
    #[default]
    Bulk,
    /// Body bytes and output bytes flow incrementally through channels.
    Streaming,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Bulk => "bulk",
            GatewayMode::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GatewayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bulk" => Ok(GatewayMode::Bulk),
            "streaming" => Ok(GatewayMode::Streaming),
            other => Err(format!("unknown mode '{}', expected 'bulk' or 'streaming'", other)),
        }
    }
}

/// Function registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory scanned once at startup. Unset means the bundled
    /// `functions/<mode>` directory.
    pub functions_dir: Option<String>,

    /// File extensions that are compiled as modules.
    pub extensions: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            functions_dir: None,
            extensions: vec!["wat".to_string(), "wasm".to_string()],
        }
    }
}

impl RegistryConfig {
    /// Directory to scan for `mode`.
    pub fn resolve_dir(&self, mode: GatewayMode) -> PathBuf {
        match &self.functions_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("functions").join(mode.as_str()),
        }
    }
}

/// Worker node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker nodes in the locality set.
    pub localities: usize,

    /// Concurrent invocations a single worker node will run.
    pub compute_slots: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            localities: 4,
            compute_slots: 16,
        }
    }
}

/// Sandbox configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Bytes requested from the guest's `alloc` export for every invocation.
    /// Bounds the largest accepted request body.
    pub alloc_size: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            alloc_size: 2_000_000_000,
        }
    }
}

/// Streaming pump configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Largest chunk pushed into the input channel at once.
    pub read_buffer_size: usize,

    /// Largest chunk drained from the output channel per socket write.
    pub write_buffer_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            write_buffer_size: 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time budget of a connection, from accept to close, in seconds.
    pub connection_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { connection_secs: 60 }
    }
}

/// Thread pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads driving sockets.
    pub transport_threads: usize,

    /// Upper bound of threads running sandbox invocations.
    pub max_blocking_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transport_threads: 1,
            max_blocking_threads: 512,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
