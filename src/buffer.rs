//! Read-buffer growth policy and the bounded deferred-write ring (§4.6,
//! Design Notes §9).

use std::collections::VecDeque;

use crate::error::{EngineError, Result};

/// The connection's read buffer. Starts at `minimum_size` and doubles up
/// to `maximum_size`; a frame that would need to grow past `maximum_size`
/// is a framing error.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Vec<u8>,
    filled: usize,
    minimum_size: usize,
    maximum_size: usize,
}

impl ReadBuffer {
    pub fn new(minimum_size: usize, maximum_size: usize) -> Self {
        ReadBuffer {
            data: vec![0u8; minimum_size],
            filled: 0,
            minimum_size,
            maximum_size,
        }
    }

    /// The unfilled tail of the buffer, for a single `read()` call.
    pub fn spare_capacity(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    pub fn advance(&mut self, n: usize) {
        self.filled += n;
    }

    /// Bytes accumulated so far this frame.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Doubles the backing storage, failing if that would exceed
    /// `maximum_size`.
    pub fn grow(&mut self) -> Result<()> {
        let next = (self.data.len() * 2).min(self.maximum_size);
        if next <= self.data.len() {
            return Err(EngineError::FrameTooLarge {
                size: self.data.len() + 1,
                maximum: self.maximum_size,
            });
        }
        self.data.resize(next, 0);
        Ok(())
    }

    /// Drops everything consumed and resets to `minimum_size`, ready for
    /// the next frame.
    pub fn reset(&mut self) {
        self.filled = 0;
        if self.data.len() != self.minimum_size {
            self.data = vec![0u8; self.minimum_size];
        }
    }
}

/// A single outbound chunk waiting to be written, with how much of it has
/// already gone out.
struct PendingWrite {
    bytes: Vec<u8>,
    offset: usize,
}

impl PendingWrite {
    fn remaining(&self) -> &[u8] {
        &self.bytes[self.offset..]
    }
}

/// The bounded deferred-write queue (Design Notes §9). Tracks total
/// queued bytes so `OP_WRITE` gating (§4.6) and the `onWritable` OOB
/// backpressure signal (crossing `high_water_mark`) can both be derived
/// from one counter.
#[derive(Debug)]
pub struct DeferredWriteQueue {
    chunks: VecDeque<PendingWriteHandle>,
    queued_bytes: usize,
    high_water_mark: usize,
    above_high_water_mark: bool,
}

/// Opaque handle so the struct above can stay `Debug` without requiring
/// `PendingWrite` to be.
#[derive(Debug)]
struct PendingWriteHandle(PendingWrite);

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("len", &self.bytes.len())
            .field("offset", &self.offset)
            .finish()
    }
}

/// Whether crossing the high-water mark should raise an `onWritable` OOB
/// event in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritabilityChange {
    None,
    BecameUnwritable,
    BecameWritable,
}

impl DeferredWriteQueue {
    pub fn new(high_water_mark: usize) -> Self {
        DeferredWriteQueue {
            chunks: VecDeque::new(),
            queued_bytes: 0,
            high_water_mark,
            above_high_water_mark: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Appends a chunk, returning whether the deferred queue transitioned
    /// from empty to non-empty (the signal that triggers enabling
    /// `OP_WRITE`, §4.6) and whether the high-water mark was crossed.
    pub fn push(&mut self, bytes: Vec<u8>) -> (bool, WritabilityChange) {
        let was_empty = self.chunks.is_empty();
        if bytes.is_empty() {
            return (false, WritabilityChange::None);
        }
        self.queued_bytes += bytes.len();
        self.chunks.push_back(PendingWriteHandle(PendingWrite { bytes, offset: 0 }));
        let change = self.recompute_high_water();
        (was_empty, change)
    }

    /// Hands the front chunk's unwritten bytes to `write_fn`, which
    /// returns how many bytes it actually wrote (as `write()` would).
    /// Advances or pops the chunk accordingly. Returns whether the queue
    /// drained to empty and any high-water-mark transition.
    pub fn write_with<F>(&mut self, mut write_fn: F) -> std::io::Result<(bool, WritabilityChange)>
    where
        F: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        while let Some(front) = self.chunks.front_mut() {
            let remaining = front.0.remaining();
            if remaining.is_empty() {
                self.chunks.pop_front();
                continue;
            }
            let n = write_fn(remaining)?;
            if n == 0 {
                break;
            }
            self.queued_bytes -= n;
            front.0.offset += n;
            if front.0.offset >= front.0.bytes.len() {
                self.chunks.pop_front();
            } else {
                // Partial write; the socket is not writable anymore this
                // round, stop trying.
                break;
            }
        }
        let change = self.recompute_high_water();
        Ok((self.chunks.is_empty(), change))
    }

    /// The bytes still queued for delivery, front chunk first, without
    /// consuming anything. Used to report `pending` to `on_closing` (§4.6).
    pub fn snapshot_remaining(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().map(|h| h.0.remaining().to_vec()).collect()
    }

    fn recompute_high_water(&mut self) -> WritabilityChange {
        let now_above = self.queued_bytes > self.high_water_mark;
        if now_above == self.above_high_water_mark {
            return WritabilityChange::None;
        }
        self.above_high_water_mark = now_above;
        if now_above {
            WritabilityChange::BecameUnwritable
        } else {
            WritabilityChange::BecameWritable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_buffer_doubles_up_to_maximum() {
        let mut buf = ReadBuffer::new(16, 64);
        assert_eq!(buf.data.len(), 16);
        buf.grow().unwrap();
        assert_eq!(buf.data.len(), 32);
        buf.grow().unwrap();
        assert_eq!(buf.data.len(), 64);
        assert!(buf.grow().is_err());
    }

    #[test]
    fn deferred_queue_reports_empty_to_nonempty_transition() {
        let mut q = DeferredWriteQueue::new(1024);
        let (became_nonempty, _) = q.push(vec![1, 2, 3]);
        assert!(became_nonempty);
        let (became_nonempty_again, _) = q.push(vec![4]);
        assert!(!became_nonempty_again);
    }

    #[test]
    fn deferred_queue_signals_high_water_mark_crossing() {
        let mut q = DeferredWriteQueue::new(4);
        let (_, change) = q.push(vec![0u8; 8]);
        assert_eq!(change, WritabilityChange::BecameUnwritable);

        let (_drained, change) = q
            .write_with(|chunk| Ok(chunk.len()))
            .unwrap();
        assert_eq!(change, WritabilityChange::BecameWritable);
    }

    #[test]
    fn deferred_queue_stops_on_partial_write() {
        let mut q = DeferredWriteQueue::new(1024);
        q.push(vec![1, 2, 3, 4]);
        let (drained, _) = q.write_with(|_| Ok(2)).unwrap();
        assert!(!drained);
        assert_eq!(q.queued_bytes(), 2);
    }
}
