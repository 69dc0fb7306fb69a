//! Batch lookup tests

use layerkv::config::ReaderOptions;
use layerkv::segment::LookupStatus;
use layerkv::{GetOptions, ReadMetrics};
use tempfile::TempDir;

use super::{disk_segment, memory_segment, shard, test_config, value_of};

#[tokio::test]
async fn test_batch_results_follow_key_order() {
    let temp = TempDir::new().unwrap();
    let disk = disk_segment(
        temp.path(),
        1,
        1,
        &[(1, Some("one"), 1), (2, Some("two"), 1), (3, None, 1)],
    );
    let mem = memory_segment(2, &[(4, Some("four"), 2)]);
    let options = ReaderOptions {
        max_concurrency: 2,
        ..Default::default()
    };
    let reader = shard(vec![disk, mem], &test_config(), options);

    let keys = [4, 3, 2, 9, 1];
    let results = reader.batch_get(&keys, &GetOptions::at(100), None).await;
    assert_eq!(results.len(), keys.len());
    assert_eq!(value_of(&results[0]), Some(&b"four"[..]));
    assert_eq!(results[1].status, LookupStatus::Deleted);
    assert_eq!(value_of(&results[2]), Some(&b"two"[..]));
    assert_eq!(results[3].status, LookupStatus::NotFound);
    assert_eq!(value_of(&results[4]), Some(&b"one"[..]));
}

#[tokio::test]
async fn test_batch_metrics_aggregate_per_key() {
    let temp = TempDir::new().unwrap();
    let disk = disk_segment(temp.path(), 1, 1, &[(1, Some("a"), 1), (2, Some("b"), 1)]);
    let options = ReaderOptions {
        max_concurrency: 1,
        yield_between_batches: true,
        ..Default::default()
    };
    let reader = shard(vec![disk], &test_config(), options);

    let mut metrics = ReadMetrics::new();
    let results = reader
        .batch_get(&[1, 2, 3], &GetOptions::at(100), Some(&mut metrics))
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(metrics.lookups, 3);
    assert_eq!(metrics.segments_searched, 3);
    assert_eq!(metrics.block_reads, 2);
}

#[tokio::test]
async fn test_empty_batch() {
    let reader = shard(vec![], &test_config(), ReaderOptions::default());
    let results = reader.batch_get(&[], &GetOptions::at(0), None).await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_unbounded_batch_sees_every_key() {
    let temp = TempDir::new().unwrap();
    let entries: Vec<(u64, Option<&str>, u32)> = (0..50).map(|k| (k, Some("v"), 1)).collect();
    let disk = disk_segment(temp.path(), 1, 1, &entries);
    let reader = shard(vec![disk], &test_config(), ReaderOptions::default());

    let keys: Vec<u64> = (0..60).collect();
    let results = reader.batch_get(&keys, &GetOptions::at(100), None).await;
    let found = results
        .iter()
        .filter(|r| r.status == LookupStatus::Found)
        .count();
    assert_eq!(found, 50);
}
