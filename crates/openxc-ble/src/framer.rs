use std::collections::VecDeque;

use crate::BleError;

/// What a write completion did to the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Fragment acknowledged; `remaining` bytes are still queued.
    Acknowledged { remaining: usize },
    /// Fragment failed; `discarded` queued bytes were dropped.
    Failed { discarded: usize },
    /// Completion arrived with no write outstanding.
    Unexpected,
}

/// Bounded FIFO of outbound bytes cut into link-sized fragments, with at most
/// one fragment in flight at a time.
#[derive(Debug)]
pub struct OutboundFramer {
    queue: VecDeque<u8>,
    capacity: usize,
    max_fragment_len: usize,
    pending_writes: usize,
}

impl OutboundFramer {
    pub fn new(capacity: usize, max_fragment_len: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            max_fragment_len: max_fragment_len.max(1),
            pending_writes: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    /// Appends all of `bytes` or nothing.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<(), BleError> {
        if self.queue.len() + bytes.len() > self.capacity {
            return Err(BleError::BufferOverflow {
                capacity: self.capacity,
                requested: bytes.len(),
            });
        }
        self.queue.extend(bytes);
        Ok(())
    }

    /// Pops the next fragment if nothing is in flight, marking it outstanding.
    pub fn next_fragment(&mut self) -> Option<Vec<u8>> {
        if self.pending_writes > 0 || self.queue.is_empty() {
            return None;
        }
        let len = self.queue.len().min(self.max_fragment_len);
        let fragment: Vec<u8> = self.queue.drain(..len).collect();
        self.pending_writes += 1;
        Some(fragment)
    }

    pub fn on_write_complete(&mut self, success: bool) -> WriteOutcome {
        if self.pending_writes == 0 {
            return WriteOutcome::Unexpected;
        }
        self.pending_writes -= 1;
        if success {
            WriteOutcome::Acknowledged {
                remaining: self.queue.len(),
            }
        } else {
            WriteOutcome::Failed {
                discarded: self.discard_queued(),
            }
        }
    }

    /// Drops every queued byte and forgets the write in flight.
    pub fn reset(&mut self) -> usize {
        self.pending_writes = 0;
        self.discard_queued()
    }

    fn discard_queued(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }
}
