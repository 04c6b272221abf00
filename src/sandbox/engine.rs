//! Shared wasmtime engine.
//!
//! One engine is created per process and shared by every worker node;
//! modules compiled against it can be instantiated from any thread.

use wasmtime::{Config, Engine};

use crate::sandbox::error::{Result, SandboxError};

/// Build the engine used for compilation and instantiation.
pub fn build_engine() -> Result<Engine> {
    let mut config = Config::new();
    config
        .cranelift_opt_level(wasmtime::OptLevel::Speed)
        .parallel_compilation(true);

    Engine::new(&config).map_err(|e| SandboxError::Engine(e.to_string()))
}
