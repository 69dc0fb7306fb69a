//! On-disk KV segment
//!
//! Immutable segment directory produced by a dump or a merge.
//!
//! ## File Format (`data`)
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (20 bytes)                                            │
//! │   Magic "LKVS" (4) | Version u16 (2) | Flags u8 (1) | pad (1)│
//! │   EntryCount u64 (8) | FixedValueLen u32 (4, 0 = variable)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                        │
//! │   [Key u64][Ts u32][EntryFlags u8][ValLen u32][Value]        │
//! │   (ValLen is omitted for fixed-length values and tombstones) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block                                                  │
//! │   [Key u64][Offset u32 | u64]  (width from header flags)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                            │
//! │   IndexOffset u64 (8) | DataCRC u32 (4) | Padding (4)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Index offsets are relative to the start of the data block. Next to
//! `data` sit `meta` (bincode [`SegmentMeta`](super::SegmentMeta)) and,
//! when raw keys are kept, `pk_value`.

mod builder;
mod iterator;
mod reader;

use crate::error::{LayerError, Result};

pub use builder::SegmentWriter;
pub use iterator::DiskSegmentIterator;
pub use reader::DiskSegment;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

pub(crate) const DATA_FILE: &str = "data";
pub(crate) const META_FILE: &str = "meta";
pub(crate) const PK_VALUE_FILE: &str = "pk_value";

/// Magic bytes identifying a layerkv segment data file
pub(crate) const MAGIC: &[u8; 4] = b"LKVS";

pub(crate) const VERSION: u16 = 1;

/// Magic (4) + Version (2) + Flags (1) + pad (1) + EntryCount (8) + FixedValueLen (4)
pub(crate) const HEADER_SIZE: u64 = 20;

/// IndexOffset (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Header flag: index offsets are 32-bit
pub(crate) const FLAG_SHORT_OFFSET: u8 = 0x01;

/// Entry flag: tombstone, no value bytes follow
pub(crate) const ENTRY_DELETED: u8 = 0x01;

/// Key (8) + Ts (4) + EntryFlags (1)
pub(crate) const ENTRY_PREFIX_SIZE: usize = 13;

/// Parsed data file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub short_offset: bool,
    pub entry_count: u64,
    pub fixed_value_len: Option<u32>,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6] = if self.short_offset { FLAG_SHORT_OFFSET } else { 0 };
        buf[8..16].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.fixed_value_len.unwrap_or(0).to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(LayerError::Corruption("segment header truncated".to_string()));
        }
        if &buf[0..4] != MAGIC {
            return Err(LayerError::Corruption(format!(
                "invalid segment magic: expected LKVS, got {:?}",
                &buf[0..4]
            )));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return Err(LayerError::Corruption(format!(
                "unsupported segment version: {}",
                version
            )));
        }
        let fixed = read_u32(buf, 16);
        Ok(Self {
            short_offset: buf[6] & FLAG_SHORT_OFFSET != 0,
            entry_count: read_u64(buf, 8),
            fixed_value_len: (fixed != 0).then_some(fixed),
        })
    }
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}
