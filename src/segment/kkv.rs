//! KKV segment
//!
//! Prefix key → ordered suffix keys → values. A segment keeps its prefixes
//! in write order and, under each prefix, its suffixes in write order.
//! Built in memory by [`KkvSegmentWriter`] and optionally persisted to a
//! single `kkv_data` file.
//!
//! ## File Format (`kkv_data`)
//! ```text
//! Header:  Magic "LKKV" (4) | Version u16 (2) | pad (2) | PrefixCount u64 (8)
//! Prefix:  [Prefix u64][DeleteTs u32][PrefixFlags u8][SuffixCount u32]
//! Suffix:  [Suffix u64][Ts u32][Flags u8][ValLen u32][Value]
//! Footer:  BodyCRC u32
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::error::{LayerError, Result};
use crate::types::{KeyHash, SegmentStats, SegmentStatus};

use super::disk::{read_u32, read_u64, META_FILE};
use super::SegmentMeta;

pub(crate) const KKV_DATA_FILE: &str = "kkv_data";
const KKV_MAGIC: &[u8; 4] = b"LKKV";
const KKV_VERSION: u16 = 1;
const KKV_HEADER_SIZE: usize = 16;
const PREFIX_HEADER_SIZE: usize = 17;
const SUFFIX_HEADER_SIZE: usize = 17;

const PREFIX_HAS_DELETE: u8 = 0x01;
const SUFFIX_DELETED: u8 = 0x01;

/// One suffix entry under a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KkvSuffix {
    pub suffix: KeyHash,
    pub value: Bytes,
    pub timestamp: u32,
    /// Suffix-level delete marker
    pub deleted: bool,
}

/// A prefix block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KkvPrefix {
    pub prefix: KeyHash,
    /// Delete-all marker: suffixes written before this time are gone
    pub delete_ts: Option<u32>,
    pub suffixes: Vec<KkvSuffix>,
}

impl KkvPrefix {
    fn new(prefix: KeyHash) -> Self {
        Self {
            prefix,
            delete_ts: None,
            suffixes: Vec::new(),
        }
    }

    /// Whether the prefix's delete-all marker hides a suffix written at `timestamp`
    pub fn hides(&self, timestamp: u32) -> bool {
        self.delete_ts.is_some_and(|ts| ts > timestamp)
    }

    fn upsert(&mut self, entry: KkvSuffix) {
        match self.suffixes.iter_mut().find(|s| s.suffix == entry.suffix) {
            Some(slot) => *slot = entry,
            None => self.suffixes.push(entry),
        }
    }
}

// =============================================================================
// Segment
// =============================================================================

/// Immutable KKV segment, in memory or loaded from disk
#[derive(Debug)]
pub struct KkvSegment {
    meta: SegmentMeta,
    prefixes: Vec<KkvPrefix>,
    /// prefix → position in `prefixes`
    index: HashMap<KeyHash, usize>,
}

impl KkvSegment {
    fn from_parts(meta: SegmentMeta, prefixes: Vec<KkvPrefix>) -> Self {
        let index = prefixes
            .iter()
            .enumerate()
            .map(|(pos, p)| (p.prefix, pos))
            .collect();
        Self {
            meta,
            prefixes,
            index,
        }
    }

    /// Load a segment directory written by [`KkvSegmentWriter::dump`]
    pub fn open(dir: &Path) -> Result<Self> {
        let meta: SegmentMeta =
            bincode::deserialize_from(std::io::BufReader::new(File::open(dir.join(META_FILE))?))?;
        let data = fs::read(dir.join(KKV_DATA_FILE))?;
        let prefixes = decode_prefixes(&data)?;
        tracing::debug!(
            "Opened kkv segment {} at {} ({} prefixes)",
            meta.id,
            dir.display(),
            prefixes.len()
        );
        Ok(Self::from_parts(meta, prefixes))
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Prefixes in storage order
    pub fn prefixes(&self) -> &[KkvPrefix] {
        &self.prefixes
    }

    pub fn prefix(&self, prefix: KeyHash) -> Option<&KkvPrefix> {
        self.index.get(&prefix).map(|&pos| &self.prefixes[pos])
    }

    pub fn evaluate_current_mem_used(&self) -> usize {
        let suffixes: usize = self
            .prefixes
            .iter()
            .flat_map(|p| p.suffixes.iter())
            .map(|s| SUFFIX_HEADER_SIZE + s.value.len())
            .sum();
        self.prefixes.len() * (PREFIX_HEADER_SIZE + 16) + suffixes
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Builder for KKV segments
#[derive(Debug, Default)]
pub struct KkvSegmentWriter {
    prefixes: Vec<KkvPrefix>,
    index: HashMap<KeyHash, usize>,
}

impl KkvSegmentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix_mut(&mut self, prefix: KeyHash) -> &mut KkvPrefix {
        let pos = match self.index.get(&prefix) {
            Some(&pos) => pos,
            None => {
                self.prefixes.push(KkvPrefix::new(prefix));
                self.index.insert(prefix, self.prefixes.len() - 1);
                self.prefixes.len() - 1
            }
        };
        &mut self.prefixes[pos]
    }

    /// Add or replace a live suffix value
    pub fn add(&mut self, prefix: KeyHash, suffix: KeyHash, value: impl Into<Bytes>, timestamp: u32) {
        self.prefix_mut(prefix).upsert(KkvSuffix {
            suffix,
            value: value.into(),
            timestamp,
            deleted: false,
        });
    }

    /// Mark one suffix deleted
    pub fn delete_suffix(&mut self, prefix: KeyHash, suffix: KeyHash, timestamp: u32) {
        self.prefix_mut(prefix).upsert(KkvSuffix {
            suffix,
            value: Bytes::new(),
            timestamp,
            deleted: true,
        });
    }

    /// Delete every suffix of `prefix` written before `timestamp`
    pub fn delete_prefix(&mut self, prefix: KeyHash, timestamp: u32) {
        let block = self.prefix_mut(prefix);
        block.delete_ts = Some(block.delete_ts.map_or(timestamp, |ts| ts.max(timestamp)));
    }

    fn stats(&self) -> SegmentStats {
        let suffixes = self.prefixes.iter().flat_map(|p| p.suffixes.iter());
        let mut stats = SegmentStats::default();
        for s in suffixes {
            stats.key_count += 1;
            stats.value_bytes += s.value.len() as u64;
            if s.deleted {
                stats.deleted_count += 1;
            }
        }
        stats
    }

    /// Freeze into an in-memory segment
    pub fn finish(self, mut meta: SegmentMeta) -> KkvSegment {
        meta.stats = self.stats();
        let mut segment = KkvSegment::from_parts(meta, self.prefixes);
        segment.meta.stats.mem_used = segment.evaluate_current_mem_used() as u64;
        segment
    }

    /// Persist into `dir` (created if missing)
    pub fn dump(self, dir: &Path, mut meta: SegmentMeta) -> Result<SegmentMeta> {
        fs::create_dir_all(dir)?;
        meta.status = SegmentStatus::Built;

        let mut body = Vec::new();
        for block in &self.prefixes {
            body.extend_from_slice(&block.prefix.to_le_bytes());
            body.extend_from_slice(&block.delete_ts.unwrap_or(0).to_le_bytes());
            body.push(if block.delete_ts.is_some() { PREFIX_HAS_DELETE } else { 0 });
            body.extend_from_slice(&(block.suffixes.len() as u32).to_le_bytes());
            for s in &block.suffixes {
                body.extend_from_slice(&s.suffix.to_le_bytes());
                body.extend_from_slice(&s.timestamp.to_le_bytes());
                body.push(if s.deleted { SUFFIX_DELETED } else { 0 });
                body.extend_from_slice(&(s.value.len() as u32).to_le_bytes());
                body.extend_from_slice(&s.value);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(KKV_DATA_FILE))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(KKV_MAGIC)?;
        writer.write_all(&KKV_VERSION.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?;
        writer.write_all(&(self.prefixes.len() as u64).to_le_bytes())?;
        writer.write_all(&body)?;
        writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        let meta = self.finish(meta).meta;
        let mut out = BufWriter::new(File::create(dir.join(META_FILE))?);
        bincode::serialize_into(&mut out, &meta)?;
        out.flush()?;
        Ok(meta)
    }
}

fn decode_prefixes(data: &[u8]) -> Result<Vec<KkvPrefix>> {
    let corrupt = |what: &str| LayerError::Corruption(format!("kkv segment: {}", what));

    if data.len() < KKV_HEADER_SIZE + 4 {
        return Err(corrupt("file too small"));
    }
    if &data[0..4] != KKV_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != KKV_VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)));
    }
    let prefix_count = read_u64(data, 8) as usize;
    let body = &data[KKV_HEADER_SIZE..data.len() - 4];
    if crc32fast::hash(body) != read_u32(data, data.len() - 4) {
        return Err(corrupt("checksum mismatch"));
    }

    let mut pos = 0;
    let mut prefixes = Vec::with_capacity(prefix_count.min(body.len() / PREFIX_HEADER_SIZE));
    for _ in 0..prefix_count {
        if pos + PREFIX_HEADER_SIZE > body.len() {
            return Err(corrupt("prefix block truncated"));
        }
        let prefix = read_u64(body, pos);
        let delete_ts = read_u32(body, pos + 8);
        let flags = body[pos + 12];
        let suffix_count = read_u32(body, pos + 13) as usize;
        pos += PREFIX_HEADER_SIZE;

        let mut block = KkvPrefix::new(prefix);
        if flags & PREFIX_HAS_DELETE != 0 {
            block.delete_ts = Some(delete_ts);
        }
        for _ in 0..suffix_count {
            if pos + SUFFIX_HEADER_SIZE > body.len() {
                return Err(corrupt("suffix entry truncated"));
            }
            let suffix = read_u64(body, pos);
            let timestamp = read_u32(body, pos + 8);
            let deleted = body[pos + 12] & SUFFIX_DELETED != 0;
            let len = read_u32(body, pos + 13) as usize;
            pos += SUFFIX_HEADER_SIZE;
            if pos + len > body.len() {
                return Err(corrupt("suffix value truncated"));
            }
            block.suffixes.push(KkvSuffix {
                suffix,
                value: Bytes::copy_from_slice(&body[pos..pos + len]),
                timestamp,
                deleted,
            });
            pos += len;
        }
        prefixes.push(block);
    }
    if pos != body.len() {
        return Err(corrupt("trailing bytes after last prefix"));
    }
    Ok(prefixes)
}
