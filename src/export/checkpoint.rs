//! Export checkpoint
//!
//! Two little-endian `u64`s, 16 raw bytes, no version tag:
//! ```text
//! ┌──────────────────┬──────────────────┐
//! │ primary (8)      │ secondary (8)    │
//! └──────────────────┴──────────────────┘
//! ```
//! KV exports store (iterator index, offset in that iterator); KKV exports
//! store (prefix position, suffix position). All zeros means the start.

use std::fmt;

use crate::error::{LayerError, Result};

pub const CHECKPOINT_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    pub primary: u64,
    pub secondary: u64,
}

impl Checkpoint {
    pub fn new(primary: u64, secondary: u64) -> Self {
        Self { primary, secondary }
    }

    pub fn is_start(&self) -> bool {
        self.primary == 0 && self.secondary == 0
    }

    pub fn to_bytes(&self) -> [u8; CHECKPOINT_SIZE] {
        let mut buf = [0u8; CHECKPOINT_SIZE];
        buf[..8].copy_from_slice(&self.primary.to_le_bytes());
        buf[8..].copy_from_slice(&self.secondary.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CHECKPOINT_SIZE {
            return Err(LayerError::InvalidArgs(format!(
                "checkpoint must be {} bytes, got {}",
                CHECKPOINT_SIZE,
                bytes.len()
            )));
        }
        let mut primary = [0u8; 8];
        let mut secondary = [0u8; 8];
        primary.copy_from_slice(&bytes[..8]);
        secondary.copy_from_slice(&bytes[8..]);
        Ok(Self {
            primary: u64::from_le_bytes(primary),
            secondary: u64::from_le_bytes(secondary),
        })
    }

    /// Hex form for command lines and logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| LayerError::InvalidArgs(format!("bad checkpoint hex {:?}: {}", text, e)))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.primary, self.secondary)
    }
}
