//! Newest-first record stream over merge sources.
//!
//! Sources arrive oldest to newest. The stream drains the newest source
//! completely, then the next newer one, and so on, so the first occurrence
//! of any key is its newest.

use crate::error::Result;
use crate::segment::{RecordIterator, SegmentReader};
use crate::types::Record;

pub struct NewestFirstIterator<'a> {
    sources: Vec<&'a SegmentReader>,
    current: Option<(usize, Box<dyn RecordIterator>)>,
    attach_raw_keys: bool,
}

impl<'a> NewestFirstIterator<'a> {
    /// `sources` in merge-input order (oldest first). With
    /// `attach_raw_keys`, records carry the raw key their segment kept.
    pub fn new(sources: &'a [SegmentReader], attach_raw_keys: bool) -> Self {
        Self {
            sources: sources.iter().rev().collect(),
            current: None,
            attach_raw_keys,
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let next_source = match &mut self.current {
                Some((idx, iter)) => {
                    if iter.has_next() {
                        let mut record = iter.next()?;
                        if self.attach_raw_keys {
                            record.raw_key = self.sources[*idx].raw_key(record.key.primary())?;
                        }
                        return Ok(Some(record));
                    }
                    *idx + 1
                }
                None => 0,
            };
            let Some(source) = self.sources.get(next_source) else {
                return Ok(None);
            };
            tracing::debug!("Merging source segment {}", source.meta().id);
            self.current = Some((next_source, source.create_iterator()?));
        }
    }
}

impl Iterator for NewestFirstIterator<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
