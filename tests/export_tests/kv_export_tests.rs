//! KV export tests

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use layerkv::config::ReaderOptions;
use layerkv::export::{ExportIterator, ExportParams};
use layerkv::segment::{MemSegment, SegmentMeta, SegmentReader, SegmentWriter};
use layerkv::types::{Locator, RecordKey, SegmentStatus};
use layerkv::{Checkpoint, IndexConfig, KvExportIterator, LayerError};
use tempfile::TempDir;

use super::{calculator, drain, string_config};

// =============================================================================
// Helper Functions
// =============================================================================

fn disk_segment(
    dir: &Path,
    id: u64,
    entries: &[(u64, Option<&str>, u32)],
    raw_keys: &[(u64, &str)],
) -> SegmentReader {
    let type_id = string_config().type_id().unwrap();
    let mut writer = SegmentWriter::new(type_id);
    for (key, value, ts) in entries {
        match value {
            Some(v) => writer.add(*key, Bytes::copy_from_slice(v.as_bytes()), *ts).unwrap(),
            None => writer.delete(*key, *ts).unwrap(),
        }
    }
    for (key, raw) in raw_keys {
        writer.add_raw_key(*key, Bytes::copy_from_slice(raw.as_bytes()));
    }
    let path = dir.join(format!("segment_{}", id));
    let meta = SegmentMeta::new(id, 0, SegmentStatus::Built, type_id).with_locator(Locator(id));
    writer.dump(&path, meta).unwrap();
    SegmentReader::open_disk(&path, &ReaderOptions::default()).unwrap()
}

/// Two segments: the newer one overwrites key 1 and deletes keys 2 and 4;
/// key 5 is past its TTL.
fn layered_segments(dir: &Path) -> Vec<SegmentReader> {
    let old = disk_segment(
        dir,
        1,
        &[
            (1, Some("a1"), 990),
            (2, Some("b1"), 990),
            (3, Some("c1"), 990),
            (5, Some("e1"), 100),
            (6, Some("f1"), 995),
        ],
        &[(3, "three")],
    );
    let new = disk_segment(
        dir,
        2,
        &[(1, Some("a2"), 999), (4, None, 999), (2, None, 999)],
        &[(1, "one")],
    );
    vec![old, new]
}

fn ttl_config() -> IndexConfig {
    IndexConfig {
        ttl_seconds: Some(100),
        ..string_config()
    }
}

fn open_export(segments: Vec<SegmentReader>, params: ExportParams) -> KvExportIterator {
    let config = ttl_config();
    KvExportIterator::init(segments, params, &config, &calculator(&config), 1000).unwrap()
}

fn keys(records: &[(layerkv::Record, Checkpoint)]) -> Vec<u64> {
    records.iter().map(|(r, _)| r.key.primary()).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_exports_newest_live_records() {
    let temp = TempDir::new().unwrap();
    let mut iter = open_export(layered_segments(temp.path()), ExportParams::default());
    assert_eq!(iter.segment_count(), 2);

    let records = drain(&mut iter);
    assert_eq!(keys(&records), vec![1, 3, 6]);
    assert_eq!(records[0].0.value, Bytes::from_static(b"a2"));
    assert!(records.iter().all(|(r, _)| !r.deleted));

    assert!(!iter.has_next());
    assert!(iter.next().unwrap_err().is_eof());
}

#[test]
fn test_checkpoints_resume_at_every_position() {
    let temp = TempDir::new().unwrap();
    let segments = layered_segments(temp.path());
    let all = drain(&mut open_export(segments.clone(), ExportParams::default()));

    for n in 0..=all.len() {
        let mut iter = open_export(segments.clone(), ExportParams::default());
        let checkpoint = if n == 0 {
            Checkpoint::new(0, 0)
        } else {
            all[n - 1].1
        };
        iter.seek_bytes(&checkpoint.to_bytes()).unwrap();
        let rest = drain(&mut iter);
        assert_eq!(rest, all[n..].to_vec(), "resuming after {} records", n);
    }
}

#[test]
fn test_seek_back_to_start_restarts() {
    let temp = TempDir::new().unwrap();
    let mut iter = open_export(layered_segments(temp.path()), ExportParams::default());
    let first = drain(&mut iter);

    iter.seek(Checkpoint::new(0, 0)).unwrap();
    assert_eq!(drain(&mut iter), first);
}

#[test]
fn test_out_of_range_iterator_index() {
    let temp = TempDir::new().unwrap();
    let mut iter = open_export(layered_segments(temp.path()), ExportParams::default());
    assert!(matches!(
        iter.seek(Checkpoint::new(2, 0)),
        Err(LayerError::OutOfRange(_))
    ));
}

#[test]
fn test_short_checkpoint_rejected() {
    let temp = TempDir::new().unwrap();
    let mut iter = open_export(layered_segments(temp.path()), ExportParams::default());
    assert!(matches!(
        iter.seek_bytes(&[0u8; 15]),
        Err(LayerError::InvalidArgs(_))
    ));
}

#[test]
fn test_raw_keys_recovered() {
    let temp = TempDir::new().unwrap();
    let params = ExportParams {
        recover_raw_key: true,
        ..Default::default()
    };
    let records = drain(&mut open_export(layered_segments(temp.path()), params));

    let raw: Vec<Option<Bytes>> = records.into_iter().map(|(r, _)| r.raw_key).collect();
    assert_eq!(
        raw,
        vec![
            Some(Bytes::from_static(b"one")),
            Some(Bytes::from_static(b"three")),
            None
        ]
    );
}

#[test]
fn test_small_arena_keeps_values_intact() {
    let temp = TempDir::new().unwrap();
    let params = ExportParams {
        arena_reset_threshold: 1,
        ..Default::default()
    };
    let records = drain(&mut open_export(layered_segments(temp.path()), params));
    let values: Vec<Bytes> = records.into_iter().map(|(r, _)| r.value).collect();
    assert_eq!(
        values,
        vec![
            Bytes::from_static(b"a2"),
            Bytes::from_static(b"c1"),
            Bytes::from_static(b"f1")
        ]
    );
}

#[test]
fn test_empty_shard() {
    let config = string_config();
    let mut iter =
        KvExportIterator::init(vec![], ExportParams::default(), &config, &calculator(&config), 0)
            .unwrap();
    assert!(!iter.has_next());
    iter.seek(Checkpoint::new(0, 0)).unwrap();
    assert!(!iter.has_next());
    assert!(iter.next().unwrap_err().is_eof());
}

#[test]
fn test_memory_segment_exported_first() {
    let temp = TempDir::new().unwrap();
    let mut segments = layered_segments(temp.path());
    let type_id = string_config().type_id().unwrap();
    let mem = MemSegment::new(SegmentMeta::new(9, 0, SegmentStatus::Building, type_id));
    mem.put(6, &b"f9"[..], 999).unwrap();
    mem.put(7, &b"g9"[..], 999).unwrap();
    segments.push(SegmentReader::Memory(Arc::new(mem)));

    let records = drain(&mut open_export(segments, ExportParams::default()));
    let got: Vec<(RecordKey, Bytes)> = records.into_iter().map(|(r, _)| (r.key, r.value)).collect();
    assert_eq!(
        got,
        vec![
            (RecordKey::Kv(6), Bytes::from_static(b"f9")),
            (RecordKey::Kv(7), Bytes::from_static(b"g9")),
            (RecordKey::Kv(1), Bytes::from_static(b"a2")),
            (RecordKey::Kv(3), Bytes::from_static(b"c1")),
        ]
    );
}
