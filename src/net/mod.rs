//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, tracking guard, assigned locality)
//!     → deadline.rs (fixed budget from accept to close)
//!     → Hand off to HTTP layer
//!
//! Connection phases (bulk):
//!     ReadingHeader → ReadingBody → Dispatching → WritingResponse → Closed
//! Connection phases (streaming):
//!     ReadingHeader → Streaming → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Deadline expiry drops the connection future; dropping is the cancellation

pub mod connection;
pub mod deadline;
pub mod listener;

pub use connection::{ConnectionContext, ConnectionGuard, ConnectionId, ConnectionTracker, Phase};
pub use deadline::{guard, Deadline};
pub use listener::{ConnectionPermit, Listener, ListenerError};
