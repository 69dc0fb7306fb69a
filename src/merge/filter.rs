//! Record filter applied to the merge stream.

use crate::types::{is_expired, Record};

/// Drops records whose TTL has run out
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordFilter {
    ttl: Option<u64>,
    now: u64,
}

impl RecordFilter {
    /// Keep everything
    pub fn pass_all() -> Self {
        Self::default()
    }

    pub fn ttl(ttl: u64, now: u64) -> Self {
        Self {
            ttl: Some(ttl),
            now,
        }
    }

    pub fn keep(&self, record: &Record) -> bool {
        match self.ttl {
            Some(ttl) => !is_expired(record.timestamp, ttl, self.now),
            None => true,
        }
    }
}
