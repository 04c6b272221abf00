//! Per-connection deadline guard.
//!
//! The guarded future owns the transport stream. When the budget runs out
//! the future is dropped, which closes the socket and releases everything the
//! connection held (channel ends, pending sandbox handles). Completion before
//! the budget cancels the timer.

use std::future::Future;
use std::time::Duration;

/// Result of running a connection under a deadline.
#[derive(Debug, PartialEq, Eq)]
pub enum Deadline<T> {
    /// The connection finished within its budget.
    Completed(T),
    /// The budget elapsed and the connection was torn down.
    Expired,
}

impl<T> Deadline<T> {
    pub fn is_expired(&self) -> bool {
        matches!(self, Deadline::Expired)
    }
}

/// Drive `connection` for at most `budget`.
pub async fn guard<F>(budget: Duration, connection: F) -> Deadline<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(budget, connection).await {
        Ok(output) => Deadline::Completed(output),
        Err(_) => Deadline::Expired,
    }
}
