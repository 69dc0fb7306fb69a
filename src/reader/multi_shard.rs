//! Multi-shard reader
//!
//! Routes each key to its shard's reader.

use crate::config::ReaderOptions;
use crate::error::{LayerError, Result};
use crate::segment::Lookup;
use crate::types::{hash_key, KeyHash};

use super::batch::run_batch;
use super::{GetOptions, ReadMetrics, ShardReader};

/// Shard owning `key` among `shard_count` shards.
///
/// Power-of-two counts use a mask; others fall back to modulo.
pub fn shard_for_key(key: KeyHash, shard_count: u32) -> u32 {
    let count = shard_count.max(1) as u64;
    if count.is_power_of_two() {
        (key & (count - 1)) as u32
    } else {
        (key % count) as u32
    }
}

/// Reader over every shard of an index
#[derive(Debug)]
pub struct MultiShardReader {
    shard_count: u32,
    /// Indexed by shard id; `None` when the shard was not opened
    shards: Vec<Option<ShardReader>>,
    options: ReaderOptions,
}

impl MultiShardReader {
    pub fn new(
        shard_count: u32,
        shards: Vec<(u32, ShardReader)>,
        options: ReaderOptions,
    ) -> Result<Self> {
        if shard_count == 0 {
            return Err(LayerError::Config("shard_count must be positive".to_string()));
        }
        let mut slots: Vec<Option<ShardReader>> = (0..shard_count).map(|_| None).collect();
        for (id, shard) in shards {
            let slot = slots.get_mut(id as usize).ok_or_else(|| {
                LayerError::InvalidArgs(format!("shard {} out of {} shards", id, shard_count))
            })?;
            if slot.replace(shard).is_some() {
                return Err(LayerError::InvalidArgs(format!("shard {} given twice", id)));
            }
        }
        Ok(Self {
            shard_count,
            shards: slots,
            options,
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard(&self, id: u32) -> Option<&ShardReader> {
        self.shards.get(id as usize).and_then(Option::as_ref)
    }

    fn route(&self, key: KeyHash) -> Result<&ShardReader> {
        let id = shard_for_key(key, self.shard_count);
        self.shard(id)
            .ok_or_else(|| LayerError::Internal(format!("no reader for shard {}", id)))
    }

    pub async fn get(
        &self,
        key: KeyHash,
        opts: &GetOptions<'_>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        match self.route(key) {
            Ok(shard) => shard.get(key, opts, metrics).await,
            Err(e) => {
                tracing::warn!("Lookup of key {:016x} failed: {}", key, e);
                Lookup::fail()
            }
        }
    }

    pub async fn get_raw(
        &self,
        raw_key: &[u8],
        opts: &GetOptions<'_>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        self.get(hash_key(raw_key), opts, metrics).await
    }

    /// Lookups across shards, bounded by `max_concurrency`. Results keep key order.
    pub async fn batch_get(
        &self,
        keys: &[KeyHash],
        opts: &GetOptions<'_>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Vec<Lookup> {
        run_batch(
            keys,
            self.options.max_concurrency,
            self.options.yield_between_batches,
            metrics,
            move |key| async move {
                let mut per_key = ReadMetrics::new();
                let lookup = self.get(key, opts, Some(&mut per_key)).await;
                (lookup, per_key)
            },
        )
        .await
    }
}
