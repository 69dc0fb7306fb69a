//! Bounded-concurrency fan-out shared by the shard and multi-shard readers.

use std::future::Future;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};

use crate::segment::Lookup;
use crate::types::KeyHash;

use super::ReadMetrics;

/// Run `lookup` for every key with at most `max_concurrency` in flight
/// (0 = one per key). Results keep key order.
///
/// With `yield_between_batches` keys go out in waves of `max_concurrency`
/// and the task yields to the runtime between waves.
pub(crate) async fn run_batch<F, Fut>(
    keys: &[KeyHash],
    max_concurrency: usize,
    yield_between_batches: bool,
    metrics: Option<&mut ReadMetrics>,
    lookup: F,
) -> Vec<Lookup>
where
    F: Fn(KeyHash) -> Fut,
    Fut: Future<Output = (Lookup, ReadMetrics)>,
{
    if keys.is_empty() {
        return Vec::new();
    }
    let width = if max_concurrency == 0 {
        keys.len()
    } else {
        max_concurrency
    };

    let results: Vec<(Lookup, ReadMetrics)> = if yield_between_batches {
        let mut out = Vec::with_capacity(keys.len());
        for wave in keys.chunks(width) {
            out.extend(join_all(wave.iter().map(|&key| lookup(key))).await);
            tokio::task::yield_now().await;
        }
        out
    } else {
        stream::iter(keys.iter().map(|&key| lookup(key)))
            .buffered(width)
            .collect()
            .await
    };

    let mut total = ReadMetrics::new();
    let lookups = results
        .into_iter()
        .map(|(lookup, per_key)| {
            total.merge_from(&per_key);
            lookup
        })
        .collect();
    if let Some(m) = metrics {
        m.merge_from(&total);
    }
    lookups
}
