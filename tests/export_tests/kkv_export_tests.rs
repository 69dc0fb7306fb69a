//! KKV export tests

use std::sync::Arc;

use bytes::Bytes;
use layerkv::export::{ExportIterator, ExportParams};
use layerkv::segment::{KkvSegment, KkvSegmentWriter, SegmentMeta};
use layerkv::types::{Locator, RecordKey, SegmentStatus};
use layerkv::{Checkpoint, IndexConfig, IndexKind, KkvExportIterator, LayerError};
use tempfile::TempDir;

use super::{calculator, drain, string_config};

// =============================================================================
// Helper Functions
// =============================================================================

fn kkv_config(ttl: Option<u64>) -> IndexConfig {
    IndexConfig {
        kind: IndexKind::Kkv,
        ttl_seconds: ttl,
        ..string_config()
    }
}

fn meta(id: u64) -> SegmentMeta {
    let type_id = string_config().type_id().unwrap();
    SegmentMeta::new(id, 0, SegmentStatus::Built, type_id).with_locator(Locator(id))
}

fn open_export(segments: Vec<Arc<KkvSegment>>, config: &IndexConfig, now: u64) -> KkvExportIterator {
    KkvExportIterator::init(segments, ExportParams::default(), config, &calculator(config), now)
        .unwrap()
}

fn suffixes(records: &[(layerkv::Record, Checkpoint)]) -> Vec<(u64, u64)> {
    records
        .iter()
        .map(|(r, _)| match r.key {
            RecordKey::Kkv { prefix, suffix } => (prefix, suffix),
            RecordKey::Kv(key) => panic!("kv key {} in kkv export", key),
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_expired_suffix_skipped() {
    let mut writer = KkvSegmentWriter::new();
    writer.add(10, 1, &b"a"[..], 990);
    writer.add(10, 2, &b"b"[..], 995);
    writer.add(10, 3, &b"c"[..], 800);
    writer.add(10, 4, &b"d"[..], 999);
    let segment = Arc::new(writer.finish(meta(1)));

    let mut iter = open_export(vec![segment], &kkv_config(Some(100)), 1000);
    assert_eq!(iter.prefix_count(), 1);
    let records = drain(&mut iter);
    assert_eq!(suffixes(&records), vec![(10, 1), (10, 2), (10, 4)]);
    assert!(!iter.has_next());
    assert!(iter.next().unwrap_err().is_eof());
}

#[test]
fn test_prefixes_ascending_and_newest_suffix_wins() {
    let mut old = KkvSegmentWriter::new();
    old.add(30, 1, &b"old"[..], 1);
    old.add(30, 2, &b"keep"[..], 1);
    old.add(20, 1, &b"x"[..], 1);
    let old = Arc::new(old.finish(meta(1)));

    let mut new = KkvSegmentWriter::new();
    new.add(30, 3, &b"three"[..], 2);
    new.add(30, 1, &b"new"[..], 2);
    let new = Arc::new(new.finish(meta(2)));

    let records = drain(&mut open_export(vec![old, new], &kkv_config(None), 100));
    assert_eq!(suffixes(&records), vec![(20, 1), (30, 3), (30, 1), (30, 2)]);

    let values: Vec<Bytes> = records.into_iter().map(|(r, _)| r.value).collect();
    assert_eq!(values[2], Bytes::from_static(b"new"));
    assert_eq!(values[3], Bytes::from_static(b"keep"));
}

#[test]
fn test_deletes_hide_suffixes() {
    let mut old = KkvSegmentWriter::new();
    old.add(5, 1, &b"before"[..], 50);
    old.add(5, 2, &b"deleted later"[..], 50);
    old.add(6, 1, &b"untouched"[..], 50);
    let old = Arc::new(old.finish(meta(1)));

    let mut new = KkvSegmentWriter::new();
    new.delete_prefix(5, 60);
    new.add(5, 3, &b"after"[..], 70);
    new.delete_suffix(6, 2, 70);
    let new = Arc::new(new.finish(meta(2)));

    let records = drain(&mut open_export(vec![old, new], &kkv_config(None), 100));
    assert_eq!(suffixes(&records), vec![(5, 3), (6, 1)]);
}

#[test]
fn test_checkpoints_resume_at_every_position() {
    let mut old = KkvSegmentWriter::new();
    for suffix in 0..4 {
        old.add(1, suffix, &b"o"[..], 10);
        old.add(2, suffix, &b"o"[..], 10);
    }
    old.delete_suffix(3, 0, 10);
    let old = Arc::new(old.finish(meta(1)));
    let mut new = KkvSegmentWriter::new();
    new.add(2, 9, &b"n"[..], 20);
    new.delete_suffix(1, 2, 20);
    let new = Arc::new(new.finish(meta(2)));

    let config = kkv_config(None);
    let segments = vec![old, new];
    let all = drain(&mut open_export(segments.clone(), &config, 100));
    assert_eq!(all.len(), 8);

    for n in 0..=all.len() {
        let mut iter = open_export(segments.clone(), &config, 100);
        let checkpoint = if n == 0 {
            Checkpoint::new(0, 0)
        } else {
            all[n - 1].1
        };
        iter.seek(Checkpoint::from_hex(&checkpoint.to_hex()).unwrap())
            .unwrap();
        assert_eq!(drain(&mut iter), all[n..].to_vec(), "resuming after {} records", n);
    }
}

#[test]
fn test_unreachable_checkpoint_is_corruption() {
    let mut writer = KkvSegmentWriter::new();
    writer.add(1, 1, &b"a"[..], 1);
    let segment = Arc::new(writer.finish(meta(1)));
    let mut iter = open_export(vec![segment], &kkv_config(None), 100);

    assert!(matches!(
        iter.seek(Checkpoint::new(0, 5)),
        Err(LayerError::Corruption(_))
    ));
    assert!(matches!(
        iter.seek(Checkpoint::new(3, 0)),
        Err(LayerError::Corruption(_))
    ));
    iter.seek(Checkpoint::new(0, 0)).unwrap();
    assert_eq!(drain(&mut iter).len(), 1);
}

#[test]
fn test_empty_kkv_shard() {
    let mut iter = open_export(vec![], &kkv_config(None), 0);
    assert!(!iter.has_next());
    iter.seek(Checkpoint::new(0, 0)).unwrap();
    assert!(matches!(
        iter.seek(Checkpoint::new(0, 1)),
        Err(LayerError::Corruption(_))
    ));
}

#[test]
fn test_dumped_segment_exports_same_records() {
    let temp = TempDir::new().unwrap();
    let build = || {
        let mut writer = KkvSegmentWriter::new();
        writer.add(4, 1, &b"x"[..], 5);
        writer.add(4, 2, &b"y"[..], 6);
        writer.delete_prefix(8, 9);
        writer
    };
    build().dump(temp.path(), meta(1)).unwrap();
    let loaded = Arc::new(KkvSegment::open(temp.path()).unwrap());
    let in_memory = Arc::new(build().finish(meta(1)));

    let config = kkv_config(None);
    let from_disk = drain(&mut open_export(vec![loaded], &config, 100));
    let from_memory = drain(&mut open_export(vec![in_memory], &config, 100));
    assert_eq!(from_disk, from_memory);
    assert_eq!(from_disk.len(), 2);
}
