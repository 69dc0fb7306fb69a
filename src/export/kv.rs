//! KV export iterator
//!
//! Walks segments newest to oldest and emits each key's newest live record.
//! A record is superseded when any newer segment's resident key index holds
//! its key; those indexes stay loaded for as long as the segments are open,
//! so the probe adds no memory of its own.

use crate::config::IndexConfig;
use crate::error::{LayerError, Result};
use crate::layout::IgnoreFieldCalculator;
use crate::segment::{freshness_key, RecordIterator, SegmentReader};
use crate::types::{is_expired, Record};

use super::{Checkpoint, ExportIterator, ExportParams, RecordArena};

pub struct KvExportIterator {
    /// Newest first
    segments: Vec<SegmentReader>,
    iters: Vec<Box<dyn RecordIterator>>,
    current: usize,
    ttl: Option<u64>,
    now: u64,
    params: ExportParams,
    arena: RecordArena,
    pending: Option<(Record, Checkpoint)>,
    /// Error hit while prefetching; surfaced by the next `next` call
    deferred: Option<LayerError>,
}

impl KvExportIterator {
    pub fn init(
        segments: Vec<SegmentReader>,
        params: ExportParams,
        config: &IndexConfig,
        calculator: &IgnoreFieldCalculator,
        current_timestamp: u64,
    ) -> Result<Self> {
        let schema = config.current_schema();
        let mut ordered = Vec::with_capacity(segments.len());
        for segment in segments {
            let meta = segment.meta();
            ordered.push((freshness_key(&meta), segment.adapt(calculator, &schema)?));
        }
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let segments: Vec<SegmentReader> = ordered.into_iter().map(|(_, s)| s).collect();

        let iters = segments
            .iter()
            .map(|s| s.create_iterator())
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Export of {} over {} segments at time {}",
            config.name,
            segments.len(),
            current_timestamp
        );

        let mut iter = Self {
            segments,
            iters,
            current: 0,
            ttl: config.ttl_seconds,
            now: current_timestamp,
            arena: RecordArena::new(params.arena_reset_threshold),
            params,
            pending: None,
            deferred: None,
        };
        iter.advance()?;
        Ok(iter)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether a strictly newer segment than `idx` holds `key`
    fn superseded(&self, idx: usize, key: u64) -> bool {
        self.segments[..idx].iter().any(|s| s.contains_key(key))
    }

    /// Prefetch the next emittable record into `pending`
    fn advance(&mut self) -> Result<()> {
        self.pending = None;
        while self.current < self.iters.len() {
            let iter = &mut self.iters[self.current];
            if !iter.has_next() {
                self.current += 1;
                continue;
            }
            let record = iter.next()?;
            let checkpoint = Checkpoint::new(self.current as u64, iter.offset());

            if record.deleted {
                continue;
            }
            if self.ttl.is_some_and(|ttl| is_expired(record.timestamp, ttl, self.now)) {
                continue;
            }
            let key = record.key.primary();
            if self.superseded(self.current, key) {
                continue;
            }

            let raw_key = if self.params.recover_raw_key {
                self.segments[self.current].raw_key(key)?
            } else {
                None
            };
            let record = Record {
                value: self.arena.alloc(&record.value),
                raw_key: raw_key.map(|raw| self.arena.alloc(&raw)),
                ..record
            };
            self.pending = Some((record, checkpoint));
            return Ok(());
        }
        Ok(())
    }
}

impl ExportIterator for KvExportIterator {
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

    /// Resume after the record that produced `checkpoint`.
    ///
    /// Iterators after the target are rewound; an iterator index past the
    /// last segment is `OutOfRange`.
    fn seek(&mut self, checkpoint: Checkpoint) -> Result<()> {
        self.pending = None;
        self.deferred = None;
        if checkpoint.is_start() {
            for iter in &mut self.iters {
                iter.reset()?;
            }
            self.current = 0;
            return self.advance();
        }

        let target = checkpoint.primary as usize;
        if checkpoint.primary >= self.iters.len() as u64 {
            return Err(LayerError::OutOfRange(format!(
                "checkpoint iterator {} of {}",
                checkpoint.primary,
                self.iters.len()
            )));
        }
        for iter in &mut self.iters[target + 1..] {
            iter.reset()?;
        }
        self.iters[target].seek(checkpoint.secondary)?;
        self.current = target;
        tracing::debug!("Export seeked to {}", checkpoint);
        self.advance()
    }
}
