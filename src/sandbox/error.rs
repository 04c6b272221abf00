//! Error types for sandbox execution.

use thiserror::Error;

/// Errors raised while instantiating or driving a guest module.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The engine could not be configured.
    #[error("engine configuration failed: {0}")]
    Engine(String),

    /// A fresh instance could not be created from the module.
    #[error("instantiation failed: {0}")]
    Instantiate(String),

    /// The module does not export `memory`.
    #[error("module does not export 'memory'")]
    MissingMemory,

    /// A required export is absent or has the wrong signature.
    #[error("export '{name}' unavailable: {reason}")]
    MissingExport { name: &'static str, reason: String },

    /// The guest trapped or a host call failed inside an export.
    #[error("call to '{export}' failed: {message}")]
    Trap { export: &'static str, message: String },

    /// A guest-supplied offset/length pair falls outside guest memory.
    #[error("{region} region [{offset}, {offset}+{len}) exceeds guest memory of {memory_len} bytes")]
    MemoryFault {
        region: &'static str,
        offset: usize,
        len: usize,
        memory_len: usize,
    },

    /// `alloc` handed back a null offset.
    #[error("alloc returned a null offset for {requested} bytes")]
    AllocationFailed { requested: usize },

    /// The payload does not fit the fixed allocation.
    #[error("payload of {len} bytes exceeds the {capacity} byte allocation")]
    PayloadTooLarge { len: usize, capacity: usize },
}

impl SandboxError {
    /// Faults caused by guest-reported offsets rather than traps.
    pub fn is_memory_fault(&self) -> bool {
        matches!(
            self,
            SandboxError::MemoryFault { .. } | SandboxError::AllocationFailed { .. }
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
