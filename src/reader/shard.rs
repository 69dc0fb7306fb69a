//! Single-shard reader
//!
//! Holds every segment of one shard and resolves point lookups across them.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::config::{IndexConfig, ReaderOptions};
use crate::error::Result;
use crate::layout::{IgnoreFieldCalculator, Schema};
use crate::segment::{freshness_key, Lookup, LookupStatus, SegmentReader};
use crate::types::{hash_key, is_expired, KeyHash, Locator, SegmentStatus};

use super::batch::run_batch;
use super::{PhaseTimer, ReadMetrics, TimeoutTerminator};

/// Per-call read parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions<'a> {
    /// Seconds since epoch, used for TTL
    pub current_timestamp: u64,
    /// Disk segments at or after this locator are skipped
    pub visible_locator: Option<Locator>,
    /// Overrides the reader's default timeout
    pub terminator: Option<&'a TimeoutTerminator>,
}

impl<'a> GetOptions<'a> {
    pub fn at(current_timestamp: u64) -> Self {
        Self {
            current_timestamp,
            ..Default::default()
        }
    }

    pub fn visible_before(mut self, locator: Locator) -> Self {
        self.visible_locator = Some(locator);
        self
    }

    pub fn with_terminator(mut self, terminator: &'a TimeoutTerminator) -> Self {
        self.terminator = Some(terminator);
        self
    }
}

/// Reader over all segments of one shard
#[derive(Debug)]
pub struct ShardReader {
    /// Building before dumping, newest first within each
    memory: Vec<SegmentReader>,
    /// Newest first
    disk: Vec<(Option<Locator>, SegmentReader)>,
    ttl: Option<u64>,
    schema: Schema,
    options: ReaderOptions,
}

impl ShardReader {
    /// Order `segments` for lookup and adapt older schemas to the index's
    /// current one.
    pub fn open(
        segments: Vec<SegmentReader>,
        config: &IndexConfig,
        calculator: &IgnoreFieldCalculator,
        options: ReaderOptions,
    ) -> Result<Self> {
        let schema = config.current_schema();
        let mut ordered = Vec::with_capacity(segments.len());
        for segment in segments {
            let meta = segment.meta();
            ordered.push((freshness_key(&meta), meta, segment.adapt(calculator, &schema)?));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0));

        let mut memory = Vec::new();
        let mut disk = Vec::new();
        for (_, meta, segment) in ordered {
            match meta.status {
                SegmentStatus::Building | SegmentStatus::Dumping => memory.push(segment),
                SegmentStatus::Built => disk.push((meta.locator, segment)),
            }
        }

        tracing::debug!(
            "Opened shard reader for {}: {} memory and {} disk segments",
            config.name,
            memory.len(),
            disk.len()
        );

        Ok(Self {
            memory,
            disk,
            ttl: config.ttl_seconds,
            schema,
            options,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Segments in lookup order
    pub fn segments(&self) -> impl Iterator<Item = &SegmentReader> {
        self.memory.iter().chain(self.disk.iter().map(|(_, s)| s))
    }

    pub fn evaluate_current_mem_used(&self) -> usize {
        self.segments().map(|s| s.evaluate_current_mem_used()).sum()
    }

    /// Point lookup
    pub async fn get(
        &self,
        key: KeyHash,
        opts: &GetOptions<'_>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        let fallback = match opts.terminator {
            Some(_) => None,
            None => self.options.timeout.map(TimeoutTerminator::new),
        };
        let terminator = opts.terminator.or(fallback.as_ref());

        let mut local = ReadMetrics::new();
        local.lookups += 1;
        let mut timer = PhaseTimer::start();

        let mut result = Lookup::not_found();
        for segment in &self.memory {
            local.segments_searched += 1;
            result = guarded_get(segment, key, terminator, &mut local).await;
            if result.status != LookupStatus::NotFound {
                break;
            }
        }

        if result.status == LookupStatus::NotFound {
            timer.enter_sstable();
            for (locator, segment) in &self.disk {
                if let (Some(visible), Some(locator)) = (opts.visible_locator, locator) {
                    if *locator >= visible {
                        continue;
                    }
                }
                local.segments_searched += 1;
                result = guarded_get(segment, key, terminator, &mut local).await;
                if result.status != LookupStatus::NotFound {
                    break;
                }
            }
        }

        timer.finish(&mut local);
        if let Some(m) = metrics {
            m.merge_from(&local);
        }
        self.apply_ttl(result, opts.current_timestamp)
    }

    /// Point lookup by raw key bytes
    pub async fn get_raw(
        &self,
        raw_key: &[u8],
        opts: &GetOptions<'_>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        self.get(hash_key(raw_key), opts, metrics).await
    }

    /// Lookups for many keys, bounded by `max_concurrency`. Results keep key order.
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

    fn apply_ttl(&self, lookup: Lookup, now: u64) -> Lookup {
        match self.ttl {
            Some(ttl)
                if lookup.status == LookupStatus::Found
                    && is_expired(lookup.timestamp, ttl, now) =>
            {
                Lookup::not_found()
            }
            _ => lookup,
        }
    }
}

/// Segment get that turns a panic in the read path into `Fail`
async fn guarded_get(
    segment: &SegmentReader,
    key: KeyHash,
    terminator: Option<&TimeoutTerminator>,
    metrics: &mut ReadMetrics,
) -> Lookup {
    match AssertUnwindSafe(segment.get(key, terminator, Some(metrics)))
        .catch_unwind()
        .await
    {
        Ok(lookup) => lookup,
        Err(_) => {
            tracing::warn!("Segment {} panicked reading key {:016x}", segment.meta().id, key);
            Lookup::fail()
        }
    }
}
