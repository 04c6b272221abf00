//! Cluster substrate subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop
//!     → set.rs (round-robin cursor picks one Locality per connection)
//!     → locality.rs (invoke / invoke_streaming on that Locality)
//!     → worker.rs (resolve path, take a compute slot, run sandbox on the blocking pool)
//!
//! Streaming byte flow (channel.rs):
//!     client body → input channel → guest
//!     guest → output channel → client body
//! ```
//!
//! # Design Decisions
//! - Connections hold an `Arc<dyn Locality>`; remote and in-process nodes look the same
//! - The cursor is the only mutable state on the dispatch path (one atomic increment)
//! - No retries: a failed invocation is reported once, the client reissues

pub mod channel;
pub mod locality;
pub mod set;
pub mod worker;

pub use channel::{channel, channel_with_flush_threshold, ByteReceiver, ByteSender, ChannelClosed};
pub use locality::{InvocationError, Locality, LocalityId};
pub use set::{EmptyLocalitySet, LocalitySet};
pub use worker::WorkerNode;
