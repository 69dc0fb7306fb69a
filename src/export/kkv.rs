//! KKV export iterator
//!
//! Prefixes are visited in ascending hash order over the union of all
//! segments. Under each prefix the suffix list is the newest segment's
//! suffixes in storage order, then each older segment's suffixes not seen
//! yet. A suffix is skipped when it is deleted, expired, or older than a
//! delete-all marker on its prefix in any segment.
//!
//! Checkpoint = (prefix position, suffix position past the emitted suffix).

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::error::{LayerError, Result};
use crate::layout::{IgnoreFieldCalculator, PackValueAdapter};
use crate::segment::{freshness_key, KkvSegment, KkvSuffix};
use crate::types::{is_expired, KeyHash, Record, RecordKey};

use super::{Checkpoint, ExportIterator, ExportParams, RecordArena};

/// One suffix of the merged list under the current prefix
#[derive(Debug)]
struct MergedSuffix {
    entry: KkvSuffix,
    /// Segment the suffix came from
    segment: usize,
}

pub struct KkvExportIterator {
    /// Newest first, with the value adapter each needs
    segments: Vec<(Arc<KkvSegment>, Option<Arc<PackValueAdapter>>)>,
    /// Union of prefix hashes, ascending
    prefixes: Vec<KeyHash>,
    prefix_pos: usize,
    /// Merged suffixes of `prefixes[prefix_pos]`, built on entry
    suffixes: Vec<MergedSuffix>,
    /// Newest delete-all marker on the current prefix
    delete_ts: Option<u32>,
    suffix_pos: usize,
    ttl: Option<u64>,
    now: u64,
    arena: RecordArena,
    pending: Option<(Record, Checkpoint)>,
    deferred: Option<LayerError>,
}

impl KkvExportIterator {
    pub fn init(
        segments: Vec<Arc<KkvSegment>>,
        params: ExportParams,
        config: &IndexConfig,
        calculator: &IgnoreFieldCalculator,
        current_timestamp: u64,
    ) -> Result<Self> {
        let schema = config.current_schema();
        let mut ordered = Vec::with_capacity(segments.len());
        for segment in segments {
            let meta = segment.meta();
            let adapter = if meta.schema_id == schema.id {
                None
            } else {
                let source = calculator.history().get(meta.schema_id).ok_or_else(|| {
                    LayerError::InvalidArgs(format!(
                        "segment schema {} not in history",
                        meta.schema_id
                    ))
                })?;
                let ignore = calculator.ignore_fields(meta.schema_id, schema.id)?;
                let adapter = PackValueAdapter::init(&source.fields, &schema.fields, &ignore)?;
                adapter.needs_conversion().then(|| Arc::new(adapter))
            };
            ordered.push((freshness_key(meta), (segment, adapter)));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let segments: Vec<_> = ordered.into_iter().map(|(_, s)| s).collect();

        let mut prefixes: Vec<KeyHash> = segments
            .iter()
            .flat_map(|(seg, _)| seg.prefixes().iter().map(|p| p.prefix))
            .collect();
        prefixes.sort_unstable();
        prefixes.dedup();

        tracing::debug!(
            "KKV export of {} over {} segments, {} prefixes",
            config.name,
            segments.len(),
            prefixes.len()
        );

        let mut iter = Self {
            segments,
            prefixes,
            prefix_pos: 0,
            suffixes: Vec::new(),
            delete_ts: None,
            suffix_pos: 0,
            ttl: config.ttl_seconds,
            now: current_timestamp,
            arena: RecordArena::new(params.arena_reset_threshold),
            pending: None,
            deferred: None,
        };
        iter.enter_prefix(0);
        iter.advance()?;
        Ok(iter)
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    /// Build the merged suffix list for prefix position `pos`
    fn enter_prefix(&mut self, pos: usize) {
        self.prefix_pos = pos;
        self.suffix_pos = 0;
        self.suffixes.clear();
        self.delete_ts = None;
        let Some(&prefix) = self.prefixes.get(pos) else {
            return;
        };
        let mut seen = HashSet::new();
        for (idx, (segment, _)) in self.segments.iter().enumerate() {
            let Some(block) = segment.prefix(prefix) else {
                continue;
            };
            if let Some(ts) = block.delete_ts {
                self.delete_ts = Some(self.delete_ts.map_or(ts, |cur| cur.max(ts)));
            }
            for entry in &block.suffixes {
                if seen.insert(entry.suffix) {
                    self.suffixes.push(MergedSuffix {
                        entry: entry.clone(),
                        segment: idx,
                    });
                }
            }
        }
    }

    fn skipped(&self, entry: &KkvSuffix) -> bool {
        entry.deleted
            || self.ttl.is_some_and(|ttl| is_expired(entry.timestamp, ttl, self.now))
            || self.delete_ts.is_some_and(|ts| ts > entry.timestamp)
    }

    fn advance(&mut self) -> Result<()> {
        self.pending = None;
        while self.prefix_pos < self.prefixes.len() {
            if self.suffix_pos >= self.suffixes.len() {
                self.enter_prefix(self.prefix_pos + 1);
                continue;
            }
            let merged = &self.suffixes[self.suffix_pos];
            self.suffix_pos += 1;
            if self.skipped(&merged.entry) {
                continue;
            }
            let value = match &self.segments[merged.segment].1 {
                Some(adapter) => adapter.convert(&merged.entry.value)?,
                None => merged.entry.value.clone(),
            };
            let record = Record {
                key: RecordKey::Kkv {
                    prefix: self.prefixes[self.prefix_pos],
                    suffix: merged.entry.suffix,
                },
                value: self.arena.alloc(&value),
                timestamp: merged.entry.timestamp,
                deleted: false,
                raw_key: None,
            };
            let checkpoint = Checkpoint::new(self.prefix_pos as u64, self.suffix_pos as u64);
            self.pending = Some((record, checkpoint));
            return Ok(());
        }
        Ok(())
    }
}

impl ExportIterator for KkvExportIterator {
    fn has_next(&self) -> bool {
        self.pending.is_some() || self.deferred.is_some()
    }

    fn next(&mut self) -> Result<(Record, Checkpoint)> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        let out = self.pending.take().ok_or(LayerError::Eof)?;
        if let Err(e) = self.advance() {
            self.deferred = Some(e);
        }
        Ok(out)
    }

    /// Resume after the suffix that produced `checkpoint`.
    ///
    /// The zero checkpoint always succeeds; any other position this shard
    /// cannot reach is `Corruption`.
    fn seek(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.pending = None;
        self.deferred = None;
        if checkpoint.is_start() {
            self.enter_prefix(0);
            return self.advance();
        }

        let prefix_count = self.prefixes.len();
        let unreachable = move || {
            LayerError::Corruption(format!(
                "checkpoint {} unreachable over {} prefixes",
                checkpoint, prefix_count
            ))
        };
        if checkpoint.primary >= self.prefixes.len() as u64 {
            return Err(unreachable());
        }
        self.enter_prefix(checkpoint.primary as usize);
        if checkpoint.secondary > self.suffixes.len() as u64 {
            let err = unreachable();
            self.enter_prefix(0);
            return Err(err);
        }
        self.suffix_pos = checkpoint.secondary as usize;
        tracing::debug!("KKV export seeked to {}", checkpoint);
        self.advance()
    }
}
