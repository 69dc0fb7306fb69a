//! Tests for multi-segment point reads
//!
//! These tests verify:
//! - Newest segment wins and tombstones hide older values
//! - TTL expiry at read time
//! - Visible-locator filtering of disk segments
//! - Timeouts from explicit terminators, default options and suspended disk reads
//! - Corrupt entries surface as a failed lookup
//! - Batch lookups keep key order and aggregate metrics
//! - Multi-shard routing
//! - Reads of segments written under an older schema

mod batch_tests;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use layerkv::config::ReaderOptions;
use layerkv::layout::{FieldConfig, FieldType, IgnoreFieldCalculator, SchemaHistory};
use layerkv::segment::{MemSegment, SegmentMeta, SegmentReader, SegmentWriter};
use layerkv::types::{Locator, SegmentStatus};
use layerkv::{IndexConfig, ShardReader};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn test_config() -> IndexConfig {
    IndexConfig::builder()
        .name("reads")
        .field(FieldConfig::new("v", FieldType::String))
        .build()
}

pub fn calculator(config: &IndexConfig) -> IgnoreFieldCalculator {
    IgnoreFieldCalculator::new(Arc::new(SchemaHistory::single(config.current_schema())))
}

/// Write a built disk segment at `locator`; `None` values are tombstones.
pub fn disk_segment(
    dir: &Path,
    id: u64,
    locator: u64,
    entries: &[(u64, Option<&str>, u32)],
) -> SegmentReader {
    let type_id = test_config().type_id().unwrap();
    let mut writer = SegmentWriter::new(type_id);
    for (key, value, ts) in entries {
        match value {
            Some(v) => writer.add(*key, Bytes::copy_from_slice(v.as_bytes()), *ts).unwrap(),
            None => writer.delete(*key, *ts).unwrap(),
        }
    }
    let path = dir.join(format!("segment_{}", id));
    let meta = SegmentMeta::new(id, 0, SegmentStatus::Built, type_id).with_locator(Locator(locator));
    writer.dump(&path, meta).unwrap();
    SegmentReader::open_disk(&path, &ReaderOptions::default()).unwrap()
}

pub fn memory_segment(id: u64, entries: &[(u64, Option<&str>, u32)]) -> SegmentReader {
    let type_id = test_config().type_id().unwrap();
    let seg = MemSegment::new(SegmentMeta::new(id, 0, SegmentStatus::Building, type_id));
    for (key, value, ts) in entries {
        match value {
            Some(v) => seg.put(*key, Bytes::copy_from_slice(v.as_bytes()), *ts).unwrap(),
            None => seg.delete(*key, *ts).unwrap(),
        };
    }
    SegmentReader::Memory(Arc::new(seg))
}

pub fn shard(segments: Vec<SegmentReader>, config: &IndexConfig, options: ReaderOptions) -> ShardReader {
    ShardReader::open(segments, config, &calculator(config), options).unwrap()
}

pub fn value_of(lookup: &layerkv::Lookup) -> Option<&[u8]> {
    lookup.value.as_deref()
}
