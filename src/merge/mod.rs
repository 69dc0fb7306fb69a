//! Merge Module
//!
//! Offline compaction of one shard's segments into a single new segment.
//!
//! ## Rules per record (newest occurrence first)
//! - expired by TTL: dropped
//! - with `drop_delete_key`: tombstones and every older occurrence of
//!   their key are dropped
//! - already written: dropped (first seen wins)
//! - otherwise written as a value or a tombstone

mod filter;
mod iterator;
mod merger;
mod params;

pub use filter::RecordFilter;
pub use iterator::NewestFirstIterator;
pub use merger::{KvMerger, MergeEstimate, MergeResult, MergeStats, TargetSegment};
pub use params::{MergeParams, CURRENT_TIME_IN_SECOND, DROP_DELETE_KEY};
