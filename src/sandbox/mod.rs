//! Sandbox subsystem.
//!
//! # Data Flow
//! ```text
//! Bulk (bulk.rs):
//!     Module → fresh Instance → memory export
//!     → alloc(alloc_size) → validate offset → copy payload in
//!     → function(offset, len) → get_output_size()
//!     → validate output region → copy output out → drop Instance
//!
//! Streaming (streaming.rs):
//!     Module + host ABI (more/get_byte/put_byte) → fresh Instance
//!     → function() pulls input channel, pushes output channel
//!     → output channel closed on return
//! ```
//!
//! # Design Decisions
//! - One engine per process, one store per invocation; instances never
//!   outlive the call that created them
//! - Guest offsets are untrusted and bounds-checked before every access
//! - Every failure is an error value; a misbehaving guest never takes down
//!   the hosting process

pub mod bulk;
pub mod engine;
pub mod error;
pub mod streaming;

pub use error::SandboxError;

use wasmtime::{Engine, Module};

use crate::cluster::channel::{ByteReceiver, ByteSender};
use crate::config::SandboxConfig;

/// Engine plus the per-invocation settings, shared by every worker node.
#[derive(Clone)]
pub struct Sandbox {
    engine: Engine,
    alloc_size: u32,
}

impl Sandbox {
    /// Create a sandbox with a freshly configured engine.
    pub fn new(config: &SandboxConfig) -> error::Result<Self> {
        Ok(Self::with_engine(engine::build_engine()?, config))
    }

    /// Create a sandbox around an existing engine.
    pub fn with_engine(engine: Engine, config: &SandboxConfig) -> Self {
        Self {
            engine,
            alloc_size: config.alloc_size,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Execute `module` with the whole payload; see [`bulk::invoke`].
    pub fn invoke_bulk(&self, module: &Module, payload: &[u8]) -> error::Result<Vec<u8>> {
        bulk::invoke(&self.engine, module, payload, self.alloc_size)
    }

    /// Execute `module` against a channel pair; see [`streaming::invoke`].
    pub fn invoke_streaming(
        &self,
        module: &Module,
        input: ByteReceiver,
        output: ByteSender,
    ) -> error::Result<()> {
        streaming::invoke(&self.engine, module, input, output)
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("alloc_size", &self.alloc_size)
            .finish_non_exhaustive()
    }
}
