//! Segment Module
//!
//! One storage unit of one shard: an in-memory segment, an on-disk segment,
//! or either of them read through a schema adapter.
//!
//! ## Responsibilities
//! - Async point get per segment (may suspend on disk I/O)
//! - Sequential iteration in storage order
//! - Resident key-index probes and memory estimates
//!
//! Callers see only [`SegmentReader`] and [`RecordIterator`]; the concrete
//! storage is a tag on the enum.

mod adapted;
mod disk;
mod kkv;
mod memory;

use std::cmp::Reverse;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::config::ReaderOptions;
use crate::error::Result;
use crate::layout::SchemaId;
use crate::reader::{ReadMetrics, TimeoutTerminator};
use crate::types::{KeyHash, Locator, Record, SegmentId, SegmentStats, SegmentStatus, TypeId};

pub use adapted::{AdaptedIterator, AdaptedReader};
pub use disk::{DiskSegment, DiskSegmentIterator, SegmentWriter};
pub use kkv::{KkvPrefix, KkvSegment, KkvSegmentWriter, KkvSuffix};
pub use memory::{MemSegment, MemSegmentIterator};

// =============================================================================
// Segment Meta
// =============================================================================

/// Descriptor of a segment, persisted next to on-disk data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub schema_id: SchemaId,
    pub status: SegmentStatus,
    pub locator: Option<Locator>,
    pub stats: SegmentStats,
    pub type_id: TypeId,
    /// Records are stored in sort-field order rather than recency order
    pub sorted: bool,
}

impl SegmentMeta {
    pub fn new(id: SegmentId, schema_id: SchemaId, status: SegmentStatus, type_id: TypeId) -> Self {
        Self {
            id,
            schema_id,
            status,
            locator: None,
            stats: SegmentStats::default(),
            type_id,
            sorted: false,
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }
}

/// Freshness rank: memory before disk, building before dumping, then newest
/// locator and id first. Sorting ascending by this key gives lookup order.
pub fn freshness_key(meta: &SegmentMeta) -> (u8, Reverse<Option<Locator>>, Reverse<SegmentId>) {
    let class = match meta.status {
        SegmentStatus::Building => 0,
        SegmentStatus::Dumping => 1,
        SegmentStatus::Built => 2,
    };
    (class, Reverse(meta.locator), Reverse(meta.id))
}

// =============================================================================
// Lookup Results
// =============================================================================

/// Outcome of a point read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    Found,
    NotFound,
    Deleted,
    Fail,
    Timeout,
}

/// Status plus value and write timestamp of a point read
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub status: LookupStatus,
    pub value: Option<Bytes>,
    pub timestamp: u32,
}

impl Lookup {
    pub fn found(value: Bytes, timestamp: u32) -> Self {
        Self {
            status: LookupStatus::Found,
            value: Some(value),
            timestamp,
        }
    }

    pub fn deleted(timestamp: u32) -> Self {
        Self::bare(LookupStatus::Deleted, timestamp)
    }

    pub fn not_found() -> Self {
        Self::bare(LookupStatus::NotFound, 0)
    }

    pub fn fail() -> Self {
        Self::bare(LookupStatus::Fail, 0)
    }

    pub fn timeout() -> Self {
        Self::bare(LookupStatus::Timeout, 0)
    }

    fn bare(status: LookupStatus, timestamp: u32) -> Self {
        Self {
            status,
            value: None,
            timestamp,
        }
    }

    pub(crate) fn from_record(record: Record) -> Self {
        if record.deleted {
            Lookup::deleted(record.timestamp)
        } else {
            Lookup::found(record.value, record.timestamp)
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Sequential cursor over one segment's records in storage order.
///
/// Offsets are private to the implementation, start at 0 and only grow.
pub trait RecordIterator: Send {
    fn has_next(&self) -> bool;

    /// Next record; `Err(LayerError::Eof)` once exhausted.
    fn next(&mut self) -> Result<Record>;

    /// Position of the next record
    fn offset(&self) -> u64;

    /// Reposition to an offset previously returned by [`offset`](Self::offset)
    fn seek(&mut self, offset: u64) -> Result<()>;

    fn reset(&mut self) -> Result<()> {
        self.seek(0)
    }
}

// =============================================================================
// Segment Reader
// =============================================================================

/// Read access to one segment
#[derive(Debug, Clone)]
pub enum SegmentReader {
    Memory(Arc<MemSegment>),
    Disk(Arc<DiskSegment>),
    Adapted(Box<AdaptedReader>),
}

impl SegmentReader {
    /// Open a sealed segment directory
    pub fn open_disk(dir: &Path, options: &ReaderOptions) -> Result<Self> {
        Ok(SegmentReader::Disk(Arc::new(DiskSegment::open(dir, options)?)))
    }

    pub fn meta(&self) -> SegmentMeta {
        match self {
            SegmentReader::Memory(seg) => seg.meta(),
            SegmentReader::Disk(seg) => seg.meta().clone(),
            SegmentReader::Adapted(adapted) => adapted.inner().meta(),
        }
    }

    /// Point lookup. Suspends only while waiting on disk I/O.
    ///
    /// Boxed because adapted readers recurse into their inner reader.
    pub fn get<'a>(
        &'a self,
        key: KeyHash,
        terminator: Option<&'a TimeoutTerminator>,
        metrics: Option<&'a mut ReadMetrics>,
    ) -> BoxFuture<'a, Lookup> {
        async move {
            match self {
                SegmentReader::Memory(seg) => seg.get(key, terminator, metrics),
                SegmentReader::Disk(seg) => DiskSegment::get(seg, key, terminator, metrics).await,
                SegmentReader::Adapted(adapted) => adapted.get(key, terminator, metrics).await,
            }
        }
        .boxed()
    }

    /// Iterator over every live or tombstoned record
    pub fn create_iterator(&self) -> Result<Box<dyn RecordIterator>> {
        match self {
            SegmentReader::Memory(seg) => Ok(Box::new(MemSegmentIterator::new(Arc::clone(seg)))),
            SegmentReader::Disk(seg) => Ok(Box::new(seg.iter()?)),
            SegmentReader::Adapted(adapted) => adapted.create_iterator(),
        }
    }

    /// Whether the segment's resident key index holds `key` (live or deleted)
    pub fn contains_key(&self, key: KeyHash) -> bool {
        match self {
            SegmentReader::Memory(seg) => seg.contains_key(key),
            SegmentReader::Disk(seg) => seg.contains_key(key),
            SegmentReader::Adapted(adapted) => adapted.inner().contains_key(key),
        }
    }

    /// Original key bytes for `key`, when the segment keeps them
    pub fn raw_key(&self, key: KeyHash) -> Result<Option<Bytes>> {
        match self {
            SegmentReader::Memory(seg) => seg.raw_key(key),
            SegmentReader::Disk(seg) => seg.raw_key(key),
            SegmentReader::Adapted(adapted) => adapted.inner().raw_key(key),
        }
    }

    /// Best-effort resident memory estimate; never blocks on I/O
    pub fn evaluate_current_mem_used(&self) -> usize {
        match self {
            SegmentReader::Memory(seg) => seg.evaluate_current_mem_used(),
            SegmentReader::Disk(seg) => seg.evaluate_current_mem_used(),
            SegmentReader::Adapted(adapted) => adapted.inner().evaluate_current_mem_used(),
        }
    }
}
