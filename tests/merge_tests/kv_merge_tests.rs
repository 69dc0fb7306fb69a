//! KV merger tests

use std::collections::HashMap;
use std::fs;

use bytes::Bytes;
use layerkv::config::{MergeConfig, ReaderOptions};
use layerkv::layout::{FieldConfig, FieldType, FieldValue, ValueLayout};
use layerkv::segment::{LookupStatus, SegmentReader};
use layerkv::types::{Locator, RecordKey};
use layerkv::{IndexConfig, IndexKind, KvMerger, LayerError, TargetSegment};
use tempfile::TempDir;

use super::{params, source, string_config, text};

// =============================================================================
// Helper Functions
// =============================================================================

fn merger(config: IndexConfig, drop_delete_key: bool, now: Option<u64>) -> KvMerger {
    KvMerger::init(config, MergeConfig::default(), &params(drop_delete_key, now)).unwrap()
}

fn reopen(dir: &std::path::Path) -> SegmentReader {
    SegmentReader::open_disk(dir, &ReaderOptions::default()).unwrap()
}

fn keys_in_order(reader: &SegmentReader) -> Vec<(u64, bool)> {
    let mut iter = reader.create_iterator().unwrap();
    let mut out = Vec::new();
    while iter.has_next() {
        let record = iter.next().unwrap();
        out.push((record.key.primary(), record.deleted));
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_newest_value_survives() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let old = source(temp.path(), &config, 1, &[(1, text("old"), 1), (2, text("only"), 1)]);
    let new = source(temp.path(), &config, 2, &[(1, text("new"), 2)]);

    let target = TargetSegment::new(temp.path().join("out"), 10).with_locator(Locator(2));
    let result = merger(config, false, None)
        .merge(&[old, new], &[target])
        .unwrap();

    assert_eq!(result.dir, temp.path().join("out").join("merged"));
    assert_eq!(result.meta.id, 10);
    assert_eq!(result.meta.locator, Some(Locator(2)));
    assert_eq!(result.stats.records_read, 3);
    assert_eq!(result.stats.duplicates_skipped, 1);
    assert_eq!(result.stats.keys_written, 2);
    assert_eq!(result.estimate.max_keys, 3);

    let merged = reopen(&result.dir);
    let lookup = merged.get(1, None, None).await;
    assert_eq!(lookup.value, text("new"));
    assert_eq!(lookup.timestamp, 2);
    assert_eq!(merged.get(2, None, None).await.value, text("only"));
    assert_eq!(merged.meta().stats.key_count, 2);
}

#[tokio::test]
async fn test_tombstones_dropped_with_drop_delete_key() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let old = source(temp.path(), &config, 1, &[(1, text("a"), 1), (2, text("b"), 1)]);
    let new = source(temp.path(), &config, 2, &[(1, None, 2)]);

    let result = merger(config, true, None)
        .merge(&[old, new], &[TargetSegment::new(temp.path().join("out"), 3)])
        .unwrap();

    assert_eq!(result.stats.deletes_dropped, 2);
    assert_eq!(result.stats.tombstones_written, 0);
    let merged = reopen(&result.dir);
    assert_eq!(merged.get(1, None, None).await.status, LookupStatus::NotFound);
    assert_eq!(merged.get(2, None, None).await.status, LookupStatus::Found);
}

#[tokio::test]
async fn test_tombstones_kept_without_drop_delete_key() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let old = source(temp.path(), &config, 1, &[(1, text("a"), 1)]);
    let new = source(temp.path(), &config, 2, &[(1, None, 2)]);

    let result = merger(config, false, None)
        .merge(&[old, new], &[TargetSegment::new(temp.path().join("out"), 3)])
        .unwrap();

    assert_eq!(result.stats.tombstones_written, 1);
    let merged = reopen(&result.dir);
    let lookup = merged.get(1, None, None).await;
    assert_eq!(lookup.status, LookupStatus::Deleted);
    assert_eq!(lookup.timestamp, 2);
}

#[test]
fn test_multiple_targets_unimplemented() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let src = source(temp.path(), &config, 1, &[(1, text("a"), 1)]);
    let targets = [
        TargetSegment::new(temp.path().join("a"), 1),
        TargetSegment::new(temp.path().join("b"), 2),
    ];
    let result = merger(config.clone(), false, None).merge(&[src.clone()], &targets);
    assert!(matches!(result, Err(LayerError::Unimplemented(_))));

    let result = merger(config, false, None).merge(&[src], &[]);
    assert!(matches!(result, Err(LayerError::Unimplemented(_))));
}

#[test]
fn test_kkv_index_rejected_at_init() {
    let config = IndexConfig {
        kind: IndexKind::Kkv,
        ..string_config()
    };
    let result = KvMerger::init(config, MergeConfig::default(), &params(false, None));
    assert!(matches!(result, Err(LayerError::Unimplemented(_))));
}

#[tokio::test]
async fn test_expired_records_dropped() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        ttl_seconds: Some(100),
        ..string_config()
    };
    let src = source(
        temp.path(),
        &config,
        1,
        &[(1, text("stale"), 800), (2, text("fresh"), 950), (3, text("edge"), 900)],
    );

    let result = merger(config, false, Some(1000))
        .merge(&[src], &[TargetSegment::new(temp.path().join("out"), 2)])
        .unwrap();

    assert_eq!(result.stats.records_expired, 2);
    let merged = reopen(&result.dir);
    assert_eq!(merged.get(1, None, None).await.status, LookupStatus::NotFound);
    assert_eq!(merged.get(2, None, None).await.status, LookupStatus::Found);
    assert_eq!(merged.get(3, None, None).await.status, LookupStatus::NotFound);
}

#[test]
fn test_ttl_requires_current_time() {
    let config = IndexConfig {
        ttl_seconds: Some(100),
        ..string_config()
    };
    let result = KvMerger::init(config, MergeConfig::default(), &params(false, None));
    assert!(matches!(result, Err(LayerError::InvalidArgs(_))));

    let result = KvMerger::init(string_config(), MergeConfig::default(), &HashMap::new());
    assert!(matches!(result, Err(LayerError::InvalidArgs(_))));
}

#[test]
fn test_sorted_merge_orders_by_sort_field() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig::builder()
        .name("sorted")
        .field(FieldConfig::new("score", FieldType::Int32))
        .sort_field("score", true)
        .build();
    let layout = ValueLayout::new(&config.fields).unwrap();
    let score = |v: i64| Some(layout.encode(&[("score", FieldValue::Int(v))]).unwrap());

    let old = source(temp.path(), &config, 1, &[(1, score(5), 1), (2, score(1), 1)]);
    let new = source(temp.path(), &config, 2, &[(3, score(9), 2), (4, None, 2), (2, score(7), 2)]);

    let result = merger(config, false, None)
        .merge(&[old, new], &[TargetSegment::new(temp.path().join("out"), 3)])
        .unwrap();
    assert!(result.meta.sorted);

    let merged = reopen(&result.dir);
    assert_eq!(
        keys_in_order(&merged),
        vec![(3, false), (2, false), (1, false), (4, true)]
    );
}

#[test]
fn test_stale_output_replaced() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let stale = temp.path().join("out").join("merged");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("leftover"), b"junk").unwrap();

    let src = source(temp.path(), &config, 1, &[(1, text("a"), 1)]);
    merger(config, false, None)
        .merge(&[src], &[TargetSegment::new(temp.path().join("out"), 2)])
        .unwrap();

    assert!(!stale.join("leftover").exists());
    assert!(stale.join("data").exists());
}

#[test]
fn test_failed_merge_removes_output() {
    let temp = TempDir::new().unwrap();
    // variable-length source merged into a fixed-length layout
    let src = source(temp.path(), &string_config(), 1, &[(1, text("abc"), 1)]);
    let fixed = IndexConfig::builder()
        .name("merged")
        .field(FieldConfig::new("v", FieldType::Int32))
        .build();

    let result = merger(fixed, false, None)
        .merge(&[src], &[TargetSegment::new(temp.path().join("out"), 2)]);
    assert!(result.is_err());
    assert!(!temp.path().join("out").join("merged").exists());
}

#[tokio::test]
async fn test_raw_keys_carried_into_output() {
    let temp = TempDir::new().unwrap();
    let config = IndexConfig {
        keep_raw_key: true,
        ..string_config()
    };
    let type_id = config.type_id().unwrap();
    let mut writer = layerkv::segment::SegmentWriter::new(type_id);
    writer.add(7, Bytes::from_static(b"v"), 1).unwrap();
    writer.add_raw_key(7, Bytes::from_static(b"seven"));
    let path = temp.path().join("source");
    writer
        .dump(
            &path,
            layerkv::segment::SegmentMeta::new(1, 0, layerkv::types::SegmentStatus::Built, type_id),
        )
        .unwrap();
    let src = reopen(&path);

    let result = merger(config, false, None)
        .merge(&[src], &[TargetSegment::new(temp.path().join("out"), 2)])
        .unwrap();
    let merged = reopen(&result.dir);
    assert_eq!(merged.raw_key(7).unwrap(), Some(Bytes::from_static(b"seven")));
    assert_eq!(merged.get(7, None, None).await.status, LookupStatus::Found);

    let record = merged.create_iterator().unwrap().next().unwrap();
    assert_eq!(record.key, RecordKey::Kv(7));
}

#[test]
fn test_estimate_scales_with_occupancy() {
    let temp = TempDir::new().unwrap();
    let config = string_config();
    let src = source(temp.path(), &config, 1, &[(1, text("a"), 1), (2, text("b"), 1)]);

    let full = KvMerger::init(
        config.clone(),
        MergeConfig {
            target_occupancy_pct: 50,
            read_buffer_size: 0,
            write_buffer_size: 0,
        },
        &params(false, None),
    )
    .unwrap();
    let estimate = full.estimate(&[src]);
    assert_eq!(estimate.max_keys, 2);
    // 2 keys * 12-byte slots at 50% occupancy
    assert_eq!(estimate.hash_table_bytes, 48);
    assert_eq!(estimate.total_bytes, 48 + 2);
}
