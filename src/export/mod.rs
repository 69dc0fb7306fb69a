//! Export Module
//!
//! Deterministic, resumable enumeration of every live record in a shard.
//!
//! ## Contract
//! - `init` orders segments and positions the iterator at the start
//! - `has_next` / `next` yield records with the checkpoint just past them
//! - `seek` resumes from a checkpoint; bad positions are errors, never clamped
//!
//! A fresh iterator seeked to the checkpoint of record N yields record N+1.

mod arena;
mod checkpoint;
mod kkv;
mod kv;

use crate::error::Result;
use crate::types::Record;

pub use arena::RecordArena;
pub use checkpoint::{Checkpoint, CHECKPOINT_SIZE};
pub use kkv::KkvExportIterator;
pub use kv::KvExportIterator;

/// Options shared by both export variants
#[derive(Debug, Clone)]
pub struct ExportParams {
    /// Attach raw keys from the segments' `pk_value` side data
    pub recover_raw_key: bool,
    /// Arena bytes served before it starts a fresh chunk
    pub arena_reset_threshold: usize,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            recover_raw_key: false,
            arena_reset_threshold: 4 * 1024 * 1024, // 4 MB
        }
    }
}

/// Resumable record export
pub trait ExportIterator {
    fn has_next(&self) -> bool;

    /// Next record and the checkpoint just past it; `Err(LayerError::Eof)`
    /// once exhausted.
    fn next(&mut self) -> Result<(Record, Checkpoint)>;

    fn seek(&mut self, checkpoint: Checkpoint) -> Result<()>;

    /// Seek to a checkpoint in its binary form
    fn seek_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.seek(Checkpoint::from_bytes(bytes)?)
    }
}
