//! Shared record model
//!
//! Keys are 64-bit hashes. KV records carry one hash; KKV records carry a
//! prefix hash plus a suffix hash.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Hashed key
pub type KeyHash = u64;

/// Segment identifier (unique within one shard)
pub type SegmentId = u64;

/// Hash a raw key into the 64-bit key space.
pub fn hash_key(raw: &[u8]) -> KeyHash {
    let hash = blake3::hash(raw);
    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(word)
}

/// Whether a value written at `timestamp` has outlived `ttl` at `now`.
///
/// A value with `ts = T` and `ttl = 1` is live at `now = T` and expired from
/// `now = T + 1` on.
pub fn is_expired(timestamp: u32, ttl: u64, now: u64) -> bool {
    (timestamp as u64).saturating_add(ttl) <= now
}

// =============================================================================
// Locator
// =============================================================================

/// Opaque, totally ordered position marker used to compare segment freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locator(pub u64);

// =============================================================================
// Segment Status
// =============================================================================

/// Lifecycle state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    /// In-memory, still accepting writes
    Building,
    /// In-memory, sealed and being dumped to disk
    Dumping,
    /// Sealed on disk
    Built,
}

// =============================================================================
// Records
// =============================================================================

/// Key of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Kv(KeyHash),
    Kkv { prefix: KeyHash, suffix: KeyHash },
}

impl RecordKey {
    /// Hash used for shard routing and dedup of KV keys
    pub fn primary(&self) -> KeyHash {
        match *self {
            RecordKey::Kv(key) => key,
            RecordKey::Kkv { prefix, .. } => prefix,
        }
    }
}

/// A single record produced by a reader or iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: RecordKey,
    /// Pack value bytes (empty for tombstones)
    pub value: Bytes,
    /// Write time in seconds
    pub timestamp: u32,
    pub deleted: bool,
    /// Original key bytes, when the index keeps them
    pub raw_key: Option<Bytes>,
}

impl Record {
    pub fn kv(key: KeyHash, value: impl Into<Bytes>, timestamp: u32) -> Self {
        Self {
            key: RecordKey::Kv(key),
            value: value.into(),
            timestamp,
            deleted: false,
            raw_key: None,
        }
    }

    pub fn kv_tombstone(key: KeyHash, timestamp: u32) -> Self {
        Self {
            key: RecordKey::Kv(key),
            value: Bytes::new(),
            timestamp,
            deleted: true,
            raw_key: None,
        }
    }
}

// =============================================================================
// Format Descriptor
// =============================================================================

/// Hash table flavor backing the on-disk key index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashTableType {
    #[default]
    Dense,
    Cuckoo,
}

impl HashTableType {
    /// Maximum occupancy percent the table tolerates before it must grow
    pub fn max_occupancy(&self) -> u32 {
        match self {
            HashTableType::Dense => 80,
            HashTableType::Cuckoo => 90,
        }
    }
}

/// Format descriptor derived from the index config.
///
/// Computed once per merge or reader open; immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeId {
    pub fixed_key: bool,
    /// Byte length of every value, when the layout is fixed-length
    pub fixed_value_len: Option<u32>,
    /// Index offsets fit in 32 bits
    pub short_offset: bool,
    pub hash_table: HashTableType,
}

impl TypeId {
    /// Width in bytes of one index offset
    pub fn offset_width(&self) -> usize {
        if self.short_offset {
            4
        } else {
            8
        }
    }
}

// =============================================================================
// Segment Statistics
// =============================================================================

/// Per-segment statistics, persisted with the segment meta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    /// Distinct keys, tombstones included
    pub key_count: u64,
    pub deleted_count: u64,
    pub value_bytes: u64,
    /// Estimated resident memory of the segment's key index and data
    pub mem_used: u64,
}
