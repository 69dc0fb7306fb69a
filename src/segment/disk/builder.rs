//! Segment Writer
//!
//! Accumulates one segment's entries and writes them out as a segment
//! directory. Entries keep insertion order; re-adding a key replaces it in
//! place.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::error::{LayerError, Result};
use crate::segment::SegmentMeta;
use crate::types::{KeyHash, SegmentStats, SegmentStatus, TypeId};

use super::{
    Header, DATA_FILE, ENTRY_DELETED, ENTRY_PREFIX_SIZE, HEADER_SIZE, META_FILE, PK_VALUE_FILE,
};

#[derive(Debug)]
struct PendingEntry {
    key: KeyHash,
    timestamp: u32,
    value: Option<Bytes>,
}

impl PendingEntry {
    fn encoded_len(&self, fixed: bool) -> usize {
        match &self.value {
            None => ENTRY_PREFIX_SIZE,
            Some(v) if fixed => ENTRY_PREFIX_SIZE + v.len(),
            Some(v) => ENTRY_PREFIX_SIZE + 4 + v.len(),
        }
    }
}

/// Builder for on-disk KV segments
#[derive(Debug)]
pub struct SegmentWriter {
    type_id: TypeId,
    entries: Vec<PendingEntry>,
    /// key → position in `entries`
    positions: HashMap<KeyHash, usize>,
    raw_keys: HashMap<KeyHash, Bytes>,
    value_bytes: usize,
}

impl SegmentWriter {
    pub fn new(type_id: TypeId) -> Self {
        Self::with_capacity(type_id, 0)
    }

    /// Writer pre-sized for `keys` distinct keys
    pub fn with_capacity(type_id: TypeId, keys: usize) -> Self {
        Self {
            type_id,
            entries: Vec::with_capacity(keys),
            positions: HashMap::with_capacity(keys),
            raw_keys: HashMap::new(),
            value_bytes: 0,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Add a live value
    pub fn add(&mut self, key: KeyHash, value: Bytes, timestamp: u32) -> Result<()> {
        if let Some(fixed) = self.type_id.fixed_value_len {
            if value.len() != fixed as usize {
                return Err(LayerError::InvalidArgs(format!(
                    "value of {} bytes in a segment of fixed {}-byte values",
                    value.len(),
                    fixed
                )));
            }
        }
        self.upsert(PendingEntry {
            key,
            timestamp,
            value: Some(value),
        });
        Ok(())
    }

    /// Add a tombstone
    pub fn delete(&mut self, key: KeyHash, timestamp: u32) -> Result<()> {
        self.upsert(PendingEntry {
            key,
            timestamp,
            value: None,
        });
        Ok(())
    }

    pub fn add_raw_key(&mut self, key: KeyHash, raw: Bytes) {
        self.raw_keys.insert(key, raw);
    }

    fn upsert(&mut self, entry: PendingEntry) {
        let added = entry.value.as_ref().map_or(0, |v| v.len());
        match self.positions.get(&entry.key) {
            Some(&pos) => {
                let old = std::mem::replace(&mut self.entries[pos], entry);
                self.value_bytes -= old.value.map_or(0, |v| v.len());
            }
            None => {
                self.positions.insert(entry.key, self.entries.len());
                self.entries.push(entry);
            }
        }
        self.value_bytes += added;
    }

    pub fn contains(&self, key: KeyHash) -> bool {
        self.positions.contains_key(&key)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate bytes held by the writer
    pub fn mem_used(&self) -> usize {
        self.entries.len() * (ENTRY_PREFIX_SIZE + 16) + self.value_bytes
    }

    /// Write the segment into `dir` (created if missing) and return its
    /// final meta.
    pub fn dump(self, dir: &Path, meta: SegmentMeta) -> Result<SegmentMeta> {
        fs::create_dir_all(dir)?;
        let fixed = self.type_id.fixed_value_len.is_some();

        let data_len: u64 = self
            .entries
            .iter()
            .map(|e| e.encoded_len(fixed) as u64)
            .sum();
        let short_offset = self.type_id.short_offset && data_len <= u32::MAX as u64;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(DATA_FILE))?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            short_offset,
            entry_count: self.entries.len() as u64,
            fixed_value_len: self.type_id.fixed_value_len,
        };
        writer.write_all(&header.encode())?;

        // Data block
        let mut hasher = crc32fast::Hasher::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut offset = 0u64;
        let mut buf = Vec::with_capacity(64);
        let mut deleted_count = 0u64;
        for entry in &self.entries {
            buf.clear();
            buf.extend_from_slice(&entry.key.to_le_bytes());
            buf.extend_from_slice(&entry.timestamp.to_le_bytes());
            match &entry.value {
                None => {
                    buf.push(ENTRY_DELETED);
                    deleted_count += 1;
                }
                Some(value) => {
                    buf.push(0);
                    if !fixed {
                        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    }
                    buf.extend_from_slice(value);
                }
            }
            writer.write_all(&buf)?;
            hasher.update(&buf);
            offsets.push((entry.key, offset));
            offset += buf.len() as u64;
        }

        // Index block
        let index_offset = HEADER_SIZE + offset;
        for (key, offset) in &offsets {
            writer.write_all(&key.to_le_bytes())?;
            if short_offset {
                writer.write_all(&(*offset as u32).to_le_bytes())?;
            } else {
                writer.write_all(&offset.to_le_bytes())?;
            }
        }

        // Footer
        writer.write_all(&index_offset.to_le_bytes())?;
        writer.write_all(&hasher.finalize().to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        if !self.raw_keys.is_empty() {
            let mut raw: Vec<(KeyHash, Vec<u8>)> = self
                .raw_keys
                .iter()
                .map(|(k, v)| (*k, v.to_vec()))
                .collect();
            raw.sort_unstable_by_key(|(k, _)| *k);
            let mut out = BufWriter::new(File::create(dir.join(PK_VALUE_FILE))?);
            bincode::serialize_into(&mut out, &raw)?;
            out.flush()?;
        }

        let mut meta = meta;
        meta.status = SegmentStatus::Built;
        meta.type_id = TypeId {
            short_offset,
            ..self.type_id
        };
        meta.stats = SegmentStats {
            key_count: self.entries.len() as u64,
            deleted_count,
            value_bytes: self.value_bytes as u64,
            mem_used: self.mem_used() as u64,
        };
        let mut out = BufWriter::new(File::create(dir.join(META_FILE))?);
        bincode::serialize_into(&mut out, &meta)?;
        out.flush()?;

        tracing::debug!(
            "Wrote segment {} to {}: {} keys, {} data bytes",
            meta.id,
            dir.display(),
            meta.stats.key_count,
            data_len
        );
        Ok(meta)
    }
}
