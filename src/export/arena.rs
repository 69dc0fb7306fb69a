//! Per-export record arena
//!
//! Bump allocator for the bytes handed out with exported records. Handed-out
//! [`Bytes`] keep their chunk alive on their own; once the arena has served
//! more than its threshold it drops its chunk and starts a fresh one.

use bytes::{Bytes, BytesMut};

const INITIAL_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub struct RecordArena {
    chunk: BytesMut,
    used: usize,
    threshold: usize,
    resets: u64,
}

impl RecordArena {
    pub fn new(threshold: usize) -> Self {
        Self {
            chunk: BytesMut::with_capacity(INITIAL_CHUNK.min(threshold.max(1))),
            used: 0,
            threshold,
            resets: 0,
        }
    }

    /// Copy `data` into the arena
    pub fn alloc(&mut self, data: &[u8]) -> Bytes {
        if self.used >= self.threshold {
            self.reset();
        }
        self.chunk.extend_from_slice(data);
        self.used += data.len();
        self.chunk.split().freeze()
    }

    /// Bytes served since the last reset
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    fn reset(&mut self) {
        self.chunk = BytesMut::with_capacity(INITIAL_CHUNK.min(self.threshold.max(1)));
        self.used = 0;
        self.resets += 1;
    }
}
