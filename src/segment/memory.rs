//! In-memory KV segment
//!
//! Append-only log plus a hash index pointing at the latest entry per key.
//! Serves reads while building; sealed to `Dumping` before it is written out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{LayerError, Result};
use crate::reader::{ReadMetrics, TimeoutTerminator};
use crate::types::{KeyHash, Record, RecordKey, SegmentStatus};

use super::{Lookup, RecordIterator, SegmentMeta, SegmentWriter};

/// Bytes charged per index slot in memory estimates
const INDEX_SLOT_BYTES: usize = 16;

#[derive(Debug, Clone)]
struct MemEntry {
    key: KeyHash,
    value: Bytes,
    timestamp: u32,
    deleted: bool,
}

#[derive(Debug, Default)]
struct MemLog {
    entries: Vec<MemEntry>,
    /// key → position of its latest entry
    index: HashMap<KeyHash, usize>,
    raw_keys: HashMap<KeyHash, Bytes>,
}

/// In-memory segment
///
/// ## Concurrency:
/// - `log`: RwLock (concurrent readers, one writer)
/// - `size`: atomic, approximate bytes of keys and values
#[derive(Debug)]
pub struct MemSegment {
    meta: RwLock<SegmentMeta>,
    log: RwLock<MemLog>,
    size: AtomicUsize,
}

impl MemSegment {
    /// Create an empty building segment
    pub fn new(mut meta: SegmentMeta) -> Self {
        meta.status = SegmentStatus::Building;
        Self {
            meta: RwLock::new(meta),
            log: RwLock::new(MemLog::default()),
            size: AtomicUsize::new(0),
        }
    }

    pub fn meta(&self) -> SegmentMeta {
        let mut meta = self.meta.read().clone();
        meta.stats.mem_used = self.evaluate_current_mem_used() as u64;
        let log = self.log.read();
        meta.stats.key_count = log.index.len() as u64;
        meta.stats.deleted_count = log
            .index
            .values()
            .filter(|&&pos| log.entries[pos].deleted)
            .count() as u64;
        meta.stats.value_bytes = log
            .index
            .values()
            .map(|&pos| log.entries[pos].value.len() as u64)
            .sum();
        meta
    }

    pub fn status(&self) -> SegmentStatus {
        self.meta.read().status
    }

    /// Stop accepting writes
    pub fn seal(&self) {
        self.meta.write().status = SegmentStatus::Dumping;
    }

    /// Put a live value. Returns the new approximate size.
    pub fn put(&self, key: KeyHash, value: impl Into<Bytes>, timestamp: u32) -> Result<usize> {
        self.append(MemEntry {
            key,
            value: value.into(),
            timestamp,
            deleted: false,
        })
    }

    /// Put a tombstone. Returns the new approximate size.
    pub fn delete(&self, key: KeyHash, timestamp: u32) -> Result<usize> {
        self.append(MemEntry {
            key,
            value: Bytes::new(),
            timestamp,
            deleted: true,
        })
    }

    /// Remember the raw key bytes behind `key`
    pub fn put_raw_key(&self, key: KeyHash, raw: impl Into<Bytes>) {
        self.log.write().raw_keys.insert(key, raw.into());
    }

    fn append(&self, entry: MemEntry) -> Result<usize> {
        if self.status() != SegmentStatus::Building {
            return Err(LayerError::InvalidArgs(format!(
                "segment {} is sealed",
                self.meta.read().id
            )));
        }
        let added = 8 + 4 + entry.value.len();
        {
            let mut log = self.log.write();
            let pos = log.entries.len();
            log.index.insert(entry.key, pos);
            log.entries.push(entry);
        }
        Ok(self.size.fetch_add(added, Ordering::Relaxed) + added)
    }

    pub fn get(
        &self,
        key: KeyHash,
        terminator: Option<&TimeoutTerminator>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        if terminator.is_some_and(|t| t.is_timeout()) {
            return Lookup::timeout();
        }
        let log = self.log.read();
        let Some(&pos) = log.index.get(&key) else {
            return Lookup::not_found();
        };
        if let Some(m) = metrics {
            m.memtable_hits += 1;
        }
        let entry = &log.entries[pos];
        if entry.deleted {
            Lookup::deleted(entry.timestamp)
        } else {
            Lookup::found(entry.value.clone(), entry.timestamp)
        }
    }

    pub fn contains_key(&self, key: KeyHash) -> bool {
        self.log.read().index.contains_key(&key)
    }

    pub fn raw_key(&self, key: KeyHash) -> Result<Option<Bytes>> {
        Ok(self.log.read().raw_keys.get(&key).cloned())
    }

    pub fn key_count(&self) -> usize {
        self.log.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }

    pub fn evaluate_current_mem_used(&self) -> usize {
        let slots = self.log.read().index.capacity();
        self.size.load(Ordering::Relaxed) + slots * INDEX_SLOT_BYTES
    }

    /// Write the sealed segment to `dir` as an on-disk segment.
    pub fn dump(&self, dir: &Path) -> Result<SegmentMeta> {
        if self.status() == SegmentStatus::Building {
            return Err(LayerError::InvalidArgs(
                "seal the segment before dumping it".to_string(),
            ));
        }
        let meta = self.meta.read().clone();
        let log = self.log.read();
        let mut writer = SegmentWriter::with_capacity(meta.type_id, log.index.len());
        for (pos, entry) in log.entries.iter().enumerate() {
            if log.index.get(&entry.key) != Some(&pos) {
                continue;
            }
            if entry.deleted {
                writer.delete(entry.key, entry.timestamp)?;
            } else {
                writer.add(entry.key, entry.value.clone(), entry.timestamp)?;
            }
            if let Some(raw) = log.raw_keys.get(&entry.key) {
                writer.add_raw_key(entry.key, raw.clone());
            }
        }
        drop(log);
        tracing::debug!("Dumping memory segment {} to {}", meta.id, dir.display());
        writer.dump(dir, meta)
    }

    /// Record at log position `pos`, if it is still the latest for its key
    fn live_record_at(&self, pos: usize) -> Option<Option<Record>> {
        let log = self.log.read();
        let entry = log.entries.get(pos)?;
        if log.index.get(&entry.key) != Some(&pos) {
            return Some(None);
        }
        Some(Some(Record {
            key: RecordKey::Kv(entry.key),
            value: entry.value.clone(),
            timestamp: entry.timestamp,
            deleted: entry.deleted,
            raw_key: None,
        }))
    }

    fn log_len(&self) -> usize {
        self.log.read().entries.len()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterates the latest entry of every key in append order.
///
/// Offsets are log positions. Entries appended after the iterator was
/// created are not visited.
pub struct MemSegmentIterator {
    segment: Arc<MemSegment>,
    pos: usize,
    end: usize,
}

impl MemSegmentIterator {
    pub fn new(segment: Arc<MemSegment>) -> Self {
        let end = segment.log_len();
        let mut iter = Self {
            segment,
            pos: 0,
            end,
        };
        iter.skip_superseded();
        iter
    }

    fn skip_superseded(&mut self) {
        while self.pos < self.end {
            match self.segment.live_record_at(self.pos) {
                Some(Some(_)) => return,
                _ => self.pos += 1,
            }
        }
    }
}

impl RecordIterator for MemSegmentIterator {
    fn has_next(&self) -> bool {
        self.pos < self.end
    }

    fn next(&mut self) -> Result<Record> {
        while self.pos < self.end {
            let slot = self.segment.live_record_at(self.pos);
            self.pos += 1;
            // an overwrite since the last step can supersede this position
            if let Some(Some(record)) = slot {
                self.skip_superseded();
                return Ok(record);
            }
        }
        Err(LayerError::Eof)
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.end as u64 {
            return Err(LayerError::Corruption(format!(
                "memory segment offset {} beyond end {}",
                offset, self.end
            )));
        }
        self.pos = offset as usize;
        self.skip_superseded();
        Ok(())
    }
}
