//! Locality abstraction: a node that can host sandbox invocations.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cluster::channel::{ByteReceiver, ByteSender};
use crate::sandbox::SandboxError;

/// Opaque identifier of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalityId(u32);

impl LocalityId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LocalityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "locality-{}", self.0)
    }
}

/// Failure of a remote invocation, as seen by the connection that asked for it.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// No module is registered under the requested path.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// The sandbox protocol failed at some step.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The worker went away before reporting a result.
    #[error("{locality} lost the invocation: {reason}")]
    WorkerLost { locality: LocalityId, reason: String },
}

impl InvocationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InvocationError::FunctionNotFound(_))
    }

    /// Short label used for the `outcome` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::FunctionNotFound(_) => "not_found",
            InvocationError::Sandbox(e) if e.is_memory_fault() => "memory_fault",
            InvocationError::Sandbox(_) => "sandbox_error",
            InvocationError::WorkerLost { .. } => "worker_lost",
        }
    }
}

/// A worker node reachable through the cluster substrate.
///
/// Both operations resolve the function path on the node itself; the caller
/// only names it.
#[async_trait]
pub trait Locality: Send + Sync + std::fmt::Debug {
    fn id(&self) -> LocalityId;

    /// Run the module at `path` once with the whole payload and return its output.
    async fn invoke(&self, path: &str, payload: Bytes) -> Result<Bytes, InvocationError>;

    /// Run the module at `path` bound to a channel pair.
    ///
    /// `output` must be closed when the invocation ends for any reason,
    /// including an unknown path.
    async fn invoke_streaming(
        &self,
        path: String,
        input: ByteReceiver,
        output: ByteSender,
    ) -> Result<(), InvocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locality_id_display() {
        assert_eq!(LocalityId::new(3).to_string(), "locality-3");
    }

    #[test]
    fn error_kinds() {
        assert!(InvocationError::FunctionNotFound("/x".into()).is_not_found());
        let fault = InvocationError::from(SandboxError::MemoryFault {
            region: "input",
            offset: 1,
            len: 2,
            memory_len: 0,
        });
        assert_eq!(fault.kind(), "memory_fault");
        assert!(!fault.is_not_found());
    }
}
