//! Disk Segment Reader
//!
//! Opens a segment directory, keeps its key index resident and serves point
//! reads. Entry reads run on the blocking pool so a lookup suspends instead
//! of stalling the runtime.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::ReaderOptions;
use crate::error::{LayerError, Result};
use crate::reader::{ReadMetrics, TimeoutTerminator};
use crate::segment::{Lookup, SegmentMeta};
use crate::types::{KeyHash, Record, RecordKey};

use super::iterator::DiskSegmentIterator;
use super::{
    read_u32, read_u64, Header, DATA_FILE, ENTRY_DELETED, ENTRY_PREFIX_SIZE, FOOTER_SIZE,
    HEADER_SIZE, META_FILE, PK_VALUE_FILE,
};

/// Bounded FIFO cache of decoded entries
#[derive(Debug)]
struct EntryCache {
    capacity: usize,
    entries: HashMap<KeyHash, Record>,
    order: VecDeque<KeyHash>,
    bytes: usize,
}

impl EntryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            bytes: 0,
        }
    }

    fn get(&self, key: KeyHash) -> Option<Record> {
        self.entries.get(&key).cloned()
    }

    fn insert(&mut self, key: KeyHash, record: Record) {
        if self.entries.contains_key(&key) {
            return;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    if let Some(evicted) = self.entries.remove(&old) {
                        self.bytes -= evicted.value.len();
                    }
                }
                None => break,
            }
        }
        self.bytes += record.value.len();
        self.order.push_back(key);
        self.entries.insert(key, record);
    }
}

/// Immutable on-disk KV segment
#[derive(Debug)]
pub struct DiskSegment {
    dir: PathBuf,
    meta: SegmentMeta,
    header: Header,
    /// Length of the data block
    data_len: u64,
    /// key → entry offset within the data block
    index: HashMap<KeyHash, u64>,
    file: Mutex<BufReader<File>>,
    cache: Option<Mutex<EntryCache>>,
    raw_keys: HashMap<KeyHash, Bytes>,
}

impl DiskSegment {
    /// Open a segment directory, loading its key index into memory.
    pub fn open(dir: &Path, options: &ReaderOptions) -> Result<Self> {
        let meta: SegmentMeta =
            bincode::deserialize_from(BufReader::new(File::open(dir.join(META_FILE))?))?;

        let mut file = File::open(dir.join(DATA_FILE))?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(LayerError::Corruption(format!(
                "segment file {} too small: {} bytes",
                dir.display(),
                file_size
            )));
        }

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf)?;
        let header = Header::decode(&header_buf)?;

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let index_offset = read_u64(&footer, 0);
        let data_crc = read_u32(&footer, 8);

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(LayerError::Corruption(format!(
                "index offset {} out of bounds in {}",
                index_offset,
                dir.display()
            )));
        }
        let data_len = index_offset - HEADER_SIZE;

        if options.verify_checksum {
            file.seek(SeekFrom::Start(HEADER_SIZE))?;
            let mut hasher = crc32fast::Hasher::new();
            let mut remaining = data_len;
            let mut chunk = vec![0u8; 64 * 1024];
            while remaining > 0 {
                let take = remaining.min(chunk.len() as u64) as usize;
                file.read_exact(&mut chunk[..take])?;
                hasher.update(&chunk[..take]);
                remaining -= take as u64;
            }
            let actual = hasher.finalize();
            if actual != data_crc {
                return Err(LayerError::Corruption(format!(
                    "data checksum mismatch in {}: expected {:08x}, got {:08x}",
                    dir.display(),
                    data_crc,
                    actual
                )));
            }
        }

        // Load index: [key u64][offset u32|u64]
        let width = if header.short_offset { 4 } else { 8 };
        let slot = 8 + width;
        let index_len = (file_size - FOOTER_SIZE - index_offset) as usize;
        if index_len % slot != 0 || (index_len / slot) as u64 != header.entry_count {
            return Err(LayerError::Corruption(format!(
                "index block of {} bytes does not hold {} entries",
                index_len, header.entry_count
            )));
        }
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; index_len];
        file.read_exact(&mut index_data)?;

        let mut index = HashMap::with_capacity(header.entry_count as usize);
        for chunk in index_data.chunks_exact(slot) {
            let key = read_u64(chunk, 0);
            let offset = if header.short_offset {
                read_u32(chunk, 8) as u64
            } else {
                read_u64(chunk, 8)
            };
            index.insert(key, offset);
        }

        let pk_path = dir.join(PK_VALUE_FILE);
        let raw_keys = if pk_path.exists() {
            let pairs: Vec<(KeyHash, Vec<u8>)> =
                bincode::deserialize_from(BufReader::new(File::open(&pk_path)?))?;
            pairs
                .into_iter()
                .map(|(k, v)| (k, Bytes::from(v)))
                .collect()
        } else {
            HashMap::new()
        };

        let cache = (options.block_cache_entries > 0)
            .then(|| Mutex::new(EntryCache::new(options.block_cache_entries)));

        tracing::debug!(
            "Opened segment {} at {} ({} keys)",
            meta.id,
            dir.display(),
            index.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            header,
            data_len,
            index,
            file: Mutex::new(BufReader::new(file)),
            cache,
            raw_keys,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains_key(&self, key: KeyHash) -> bool {
        self.index.contains_key(&key)
    }

    pub fn raw_key(&self, key: KeyHash) -> Result<Option<Bytes>> {
        Ok(self.raw_keys.get(&key).cloned())
    }

    pub fn evaluate_current_mem_used(&self) -> usize {
        let cached = self.cache.as_ref().map_or(0, |c| {
            let c = c.lock();
            c.bytes + c.entries.len() * ENTRY_PREFIX_SIZE
        });
        let raw: usize = self.raw_keys.values().map(|v| v.len() + 8).sum();
        self.index.capacity() * 16 + cached + raw
    }

    /// Point lookup.
    ///
    /// Index misses answer without I/O. A disk read suspends the caller
    /// until the entry arrives or the terminator's deadline passes.
    pub async fn get(
        this: &Arc<Self>,
        key: KeyHash,
        terminator: Option<&TimeoutTerminator>,
        mut metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        if terminator.is_some_and(|t| t.is_timeout()) {
            return Lookup::timeout();
        }
        let Some(&offset) = this.index.get(&key) else {
            return Lookup::not_found();
        };

        if let Some(cache) = &this.cache {
            let hit = cache.lock().get(key);
            if let Some(m) = metrics.as_deref_mut() {
                if hit.is_some() {
                    m.cache_hits += 1;
                } else {
                    m.cache_misses += 1;
                }
            }
            if let Some(record) = hit {
                return Lookup::from_record(record);
            }
        }

        let seg = Arc::clone(this);
        let read = tokio::task::spawn_blocking(move || seg.read_entry(offset));
        let joined = match terminator {
            Some(t) => match tokio::time::timeout_at(t.deadline(), read).await {
                Ok(joined) => joined,
                Err(_) => return Lookup::timeout(),
            },
            None => read.await,
        };
        if terminator.is_some_and(|t| t.is_timeout()) {
            return Lookup::timeout();
        }

        match joined {
            Ok(Ok((record, len))) => {
                if let Some(m) = metrics.as_deref_mut() {
                    m.block_reads += 1;
                    m.block_read_bytes += len;
                }
                if let Some(cache) = &this.cache {
                    cache.lock().insert(key, record.clone());
                }
                Lookup::from_record(record)
            }
            Ok(Err(e)) => {
                tracing::warn!("Read of key {:016x} in segment {} failed: {}", key, this.meta.id, e);
                Lookup::fail()
            }
            Err(e) => {
                tracing::warn!("Read task for segment {} aborted: {}", this.meta.id, e);
                Lookup::fail()
            }
        }
    }

    /// Read and decode the entry at `offset` (relative to the data block).
    /// Returns the record and its encoded length.
    pub fn read_entry(&self, offset: u64) -> Result<(Record, u64)> {
        if offset >= self.data_len {
            return Err(LayerError::Corruption(format!(
                "entry offset {} beyond data block of {} bytes",
                offset, self.data_len
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(HEADER_SIZE + offset))?;
        decode_entry(
            &mut *file,
            self.header.fixed_value_len,
            self.data_len - offset,
        )
    }

    /// Sequential iterator with its own file handle
    pub fn iter(&self) -> Result<DiskSegmentIterator> {
        DiskSegmentIterator::open(
            &self.dir.join(DATA_FILE),
            self.data_len,
            self.header.fixed_value_len,
        )
    }
}

/// Decode one entry from `reader`, which must not run past `remaining`
/// bytes of the data block.
pub(super) fn decode_entry<R: Read>(
    reader: &mut R,
    fixed_value_len: Option<u32>,
    remaining: u64,
) -> Result<(Record, u64)> {
    let truncated = || LayerError::Corruption("segment entry truncated".to_string());

    if remaining < ENTRY_PREFIX_SIZE as u64 {
        return Err(truncated());
    }
    let mut prefix = [0u8; ENTRY_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;
    let key = read_u64(&prefix, 0);
    let timestamp = read_u32(&prefix, 8);
    let flags = prefix[12];
    let mut consumed = ENTRY_PREFIX_SIZE as u64;

    if flags & ENTRY_DELETED != 0 {
        return Ok((Record::kv_tombstone(key, timestamp), consumed));
    }

    let value_len = match fixed_value_len {
        Some(len) => len as u64,
        None => {
            if remaining < consumed + 4 {
                return Err(truncated());
            }
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            consumed += 4;
            u32::from_le_bytes(len) as u64
        }
    };
    if remaining < consumed + value_len {
        return Err(truncated());
    }
    let mut value = vec![0u8; value_len as usize];
    reader.read_exact(&mut value)?;
    consumed += value_len;

    Ok((
        Record {
            key: RecordKey::Kv(key),
            value: Bytes::from(value),
            timestamp,
            deleted: false,
            raw_key: None,
        },
        consumed,
    ))
}
