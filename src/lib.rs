//! # layerkv
//!
//! Layered, multi-segment KV/KKV storage engine:
//! - Schema-evolving value layouts with per-segment adapters
//! - Async point and batch lookups across memory and disk segments
//! - Offline merge (compaction) with TTL and tombstone policies
//! - Resumable export with binary checkpoints
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │  Point reads (reader)    │     │  Export (export)         │
//! │  Shard / MultiShard      │     │  KV / KKV + checkpoints  │
//! └────────────┬─────────────┘     └────────────┬─────────────┘
//!              │                                │
//!              ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                SegmentReader (segment)                      │
//! │        Memory  |  Disk  |  Adapted (layout adapter)         │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │
//!              ┌────────────────┴────────────────┐
//!              ▼                                 ▼
//!     ┌─────────────────┐              ┌──────────────────┐
//!     │ Value layouts   │              │ Merge (merge)    │
//!     │ & schemas       │              │ newest-first,    │
//!     │ (layout)        │              │ dedup, TTL       │
//!     └─────────────────┘              └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod layout;
pub mod segment;
pub mod reader;
pub mod merge;
pub mod export;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LayerError, Result};
pub use config::{IndexConfig, IndexKind, MergeConfig, ReaderOptions};
pub use types::{hash_key, KeyHash, Locator, Record, RecordKey};
pub use segment::{Lookup, LookupStatus, SegmentReader};
pub use reader::{GetOptions, MultiShardReader, ReadMetrics, ShardReader, TimeoutTerminator};
pub use merge::{KvMerger, TargetSegment};
pub use export::{Checkpoint, ExportIterator, KkvExportIterator, KvExportIterator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of layerkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
