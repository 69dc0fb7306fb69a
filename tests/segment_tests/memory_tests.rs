//! Memory segment tests

use std::sync::Arc;

use bytes::Bytes;
use layerkv::segment::{LookupStatus, MemSegment, SegmentMeta, SegmentReader};
use layerkv::types::{SegmentStatus, RecordKey};
use layerkv::LayerError;
use tempfile::TempDir;

use super::{open, var_type_id};

fn new_segment(id: u64) -> Arc<MemSegment> {
    Arc::new(MemSegment::new(SegmentMeta::new(
        id,
        0,
        SegmentStatus::Building,
        var_type_id(),
    )))
}

#[tokio::test]
async fn test_latest_write_wins() {
    let seg = new_segment(1);
    seg.put(1, &b"old"[..], 1).unwrap();
    seg.put(1, &b"new"[..], 2).unwrap();
    seg.delete(2, 3).unwrap();

    let reader = SegmentReader::Memory(Arc::clone(&seg));
    let found = reader.get(1, None, None).await;
    assert_eq!(found.value, Some(Bytes::from_static(b"new")));
    assert_eq!(found.timestamp, 2);
    assert_eq!(reader.get(2, None, None).await.status, LookupStatus::Deleted);
    assert_eq!(reader.get(3, None, None).await.status, LookupStatus::NotFound);

    let meta = reader.meta();
    assert_eq!(meta.status, SegmentStatus::Building);
    assert_eq!(meta.stats.key_count, 2);
    assert_eq!(meta.stats.deleted_count, 1);
    assert!(meta.stats.mem_used > 0);
}

#[test]
fn test_sealed_segment_rejects_writes() {
    let seg = new_segment(1);
    seg.put(1, &b"a"[..], 1).unwrap();
    seg.seal();
    assert_eq!(seg.status(), SegmentStatus::Dumping);
    assert!(matches!(seg.put(2, &b"b"[..], 1), Err(LayerError::InvalidArgs(_))));
}

#[test]
fn test_dump_requires_seal() {
    let temp = TempDir::new().unwrap();
    let seg = new_segment(1);
    seg.put(1, &b"a"[..], 1).unwrap();
    assert!(matches!(seg.dump(temp.path()), Err(LayerError::InvalidArgs(_))));
}

#[tokio::test]
async fn test_dump_keeps_latest_entries() {
    let temp = TempDir::new().unwrap();
    let seg = new_segment(4);
    seg.put(1, &b"a"[..], 1).unwrap();
    seg.put(2, &b"b"[..], 1).unwrap();
    seg.put(1, &b"a2"[..], 2).unwrap();
    seg.delete(2, 3).unwrap();
    seg.put_raw_key(1, &b"one"[..]);
    seg.seal();

    let meta = seg.dump(temp.path()).unwrap();
    assert_eq!(meta.id, 4);
    assert_eq!(meta.status, SegmentStatus::Built);
    assert_eq!(meta.stats.key_count, 2);

    let disk = open(temp.path());
    assert_eq!(disk.get(1, None, None).await.value, Some(Bytes::from_static(b"a2")));
    assert_eq!(disk.get(2, None, None).await.status, LookupStatus::Deleted);
    assert_eq!(disk.raw_key(1).unwrap(), Some(Bytes::from_static(b"one")));
}

#[test]
fn test_iterator_skips_superseded_positions() {
    let seg = new_segment(1);
    seg.put(1, &b"a"[..], 1).unwrap();
    seg.put(2, &b"b"[..], 1).unwrap();
    seg.put(1, &b"c"[..], 2).unwrap();

    let mut iter = SegmentReader::Memory(Arc::clone(&seg)).create_iterator().unwrap();
    let first = iter.next().unwrap();
    assert_eq!(first.key, RecordKey::Kv(2));
    let second = iter.next().unwrap();
    assert_eq!(second.key, RecordKey::Kv(1));
    assert_eq!(second.value, Bytes::from_static(b"c"));
    assert!(!iter.has_next());
    assert!(iter.next().unwrap_err().is_eof());
}

#[test]
fn test_iterator_ignores_later_appends() {
    let seg = new_segment(1);
    seg.put(1, &b"a"[..], 1).unwrap();
    let mut iter = SegmentReader::Memory(Arc::clone(&seg)).create_iterator().unwrap();
    seg.put(2, &b"b"[..], 1).unwrap();

    iter.next().unwrap();
    assert!(!iter.has_next());
}

#[test]
fn test_iterator_seek_past_end_fails() {
    let seg = new_segment(1);
    seg.put(1, &b"a"[..], 1).unwrap();
    let mut iter = SegmentReader::Memory(seg).create_iterator().unwrap();
    assert!(matches!(iter.seek(5), Err(LayerError::Corruption(_))));
    iter.seek(1).unwrap();
    assert!(!iter.has_next());
}
