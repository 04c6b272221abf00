//! FIFO byte channels between the transport side and a sandbox.
//!
//! A channel carries chunks of bytes from exactly one producer to exactly one
//! consumer. The producer may push whole chunks or single bytes (buffered
//! until flushed). Closing the sender, explicitly or by dropping it, is the
//! end-of-data marker: the consumer sees it only after it has drained every
//! chunk pushed before the close.
//!
//! Both ends have a blocking and an async face because the two directions of
//! a streaming connection swap roles:
//!
//! ```text
//! input:  input pump (async push)  ──▶ guest `more`/`get_byte` (blocking pull)
//! output: guest `put_byte` (push)  ──▶ output pump (async drain)
//! ```
//!
//! Capacity is unbounded; the guest consumes byte-at-a-time so no bound is
//! enforced beyond memory.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Default size at which buffered single-byte pushes are flushed.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024;

/// The receiving end went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// Create a connected sender/receiver pair.
pub fn channel() -> (ByteSender, ByteReceiver) {
    channel_with_flush_threshold(DEFAULT_FLUSH_THRESHOLD)
}

/// Create a pair whose sender flushes buffered bytes every `flush_at` bytes.
pub fn channel_with_flush_threshold(flush_at: usize) -> (ByteSender, ByteReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ByteSender {
            tx,
            pending: BytesMut::new(),
            flush_at: flush_at.max(1),
        },
        ByteReceiver {
            rx,
            current: Bytes::new(),
        },
    )
}

/// Producing end of a byte channel.
#[derive(Debug)]
pub struct ByteSender {
    tx: mpsc::UnboundedSender<Bytes>,
    pending: BytesMut,
    flush_at: usize,
}

impl ByteSender {
    /// Append one chunk. Buffered bytes go out first to keep FIFO order.
    pub fn push(&mut self, chunk: Bytes) -> Result<(), ChannelClosed> {
        self.flush()?;
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).map_err(|_| ChannelClosed)
    }

    /// Append a single byte to the local buffer, flushing when it fills.
    pub fn push_byte(&mut self, byte: u8) -> Result<(), ChannelClosed> {
        if self.tx.is_closed() {
            return Err(ChannelClosed);
        }
        self.pending.put_u8(byte);
        if self.pending.len() >= self.flush_at {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand buffered bytes to the consumer.
    pub fn flush(&mut self) -> Result<(), ChannelClosed> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.tx.send(chunk).map_err(|_| ChannelClosed)
    }

    /// Flush and signal end-of-data.
    pub fn close(mut self) -> Result<(), ChannelClosed> {
        self.flush()
    }

    /// True once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Drop for ByteSender {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Consuming end of a byte channel.
#[derive(Debug)]
pub struct ByteReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
}

impl ByteReceiver {
    /// Wait for data and return up to `max` bytes of it.
    ///
    /// Waits only for the first byte; whatever else is already queued is
    /// taken without waiting. An empty result means the sender closed and
    /// everything has been drained.
    pub async fn recv_chunk(&mut self, max: usize) -> Bytes {
        let max = max.max(1);
        while self.current.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.current = chunk,
                None => return Bytes::new(),
            }
        }
        if self.current.len() >= max {
            return self.current.split_to(max);
        }

        let mut out = BytesMut::with_capacity(max);
        out.put(std::mem::take(&mut self.current));
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(mut chunk) => {
                    let take = chunk.len().min(max - out.len());
                    out.put(chunk.split_to(take));
                    self.current = chunk;
                }
                Err(_) => break,
            }
        }
        out.freeze()
    }

    /// Whether a byte is available, without blocking.
    ///
    /// `None` means nothing is buffered yet but the sender is still open.
    pub fn try_has_more(&mut self) -> Option<bool> {
        while self.current.is_empty() {
            match self.rx.try_recv() {
                Ok(chunk) => self.current = chunk,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(false),
            }
        }
        Some(true)
    }

    /// Block until a byte is available (`true`) or the channel is exhausted.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_has_more(&mut self) -> bool {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return false,
            }
        }
        true
    }

    /// Block for the next byte; `None` once exhausted.
    pub fn blocking_next_byte(&mut self) -> Option<u8> {
        if self.blocking_has_more() {
            Some(self.current.get_u8())
        } else {
            None
        }
    }
}

/// Blocking iteration to exhaustion.
impl Iterator for ByteReceiver {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.blocking_next_byte()
    }
}
