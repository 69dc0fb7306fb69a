//! Tests for segment storage
//!
//! These tests verify:
//! - Disk segment writing, reopening and point reads
//! - Memory segment reads, sealing and dumping
//! - Iteration order, offsets and seeking
//! - Corruption detection
//! - Schema-adapted reads

mod adapted_tests;
mod memory_tests;

use std::path::Path;

use bytes::Bytes;
use layerkv::config::ReaderOptions;
use layerkv::segment::{SegmentMeta, SegmentReader, SegmentWriter};
use layerkv::types::{Locator, SegmentStatus, TypeId};
use layerkv::IndexConfig;
use layerkv::layout::{FieldConfig, FieldType};

// =============================================================================
// Helper Functions
// =============================================================================

pub fn string_config() -> IndexConfig {
    IndexConfig::builder()
        .name("t")
        .field(FieldConfig::new("v", FieldType::String))
        .build()
}

pub fn var_type_id() -> TypeId {
    string_config().type_id().unwrap()
}

/// Write a disk segment; `None` values are tombstones.
pub fn write_disk_segment(
    dir: &Path,
    id: u64,
    type_id: TypeId,
    entries: &[(u64, Option<&[u8]>, u32)],
) -> SegmentMeta {
    let mut writer = SegmentWriter::new(type_id);
    for (key, value, ts) in entries {
        match value {
            Some(v) => writer.add(*key, Bytes::copy_from_slice(v), *ts).unwrap(),
            None => writer.delete(*key, *ts).unwrap(),
        }
    }
    let meta = SegmentMeta::new(id, 0, SegmentStatus::Built, type_id).with_locator(Locator(id));
    writer.dump(dir, meta).unwrap()
}

pub fn open(dir: &Path) -> SegmentReader {
    SegmentReader::open_disk(dir, &ReaderOptions::default()).unwrap()
}
