//! Disk Segment Iterator
//!
//! Sequential iteration over a segment's data block in write order.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::error::{LayerError, Result};
use crate::segment::RecordIterator;
use crate::types::Record;

use super::reader::decode_entry;
use super::HEADER_SIZE;

/// Iterator over disk segment entries
///
/// Offsets count bytes from the start of the data block.
pub struct DiskSegmentIterator {
    file: BufReader<File>,
    data_len: u64,
    fixed_value_len: Option<u32>,
    pos: u64,
}

impl DiskSegmentIterator {
    pub(super) fn open(path: &Path, data_len: u64, fixed_value_len: Option<u32>) -> Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            data_len,
            fixed_value_len,
            pos: 0,
        })
    }
}

impl RecordIterator for DiskSegmentIterator {
    fn has_next(&self) -> bool {
        self.pos < self.data_len
    }

    fn next(&mut self) -> Result<Record> {
        if self.pos >= self.data_len {
            return Err(LayerError::Eof);
        }
        let (record, len) =
            decode_entry(&mut self.file, self.fixed_value_len, self.data_len - self.pos)?;
        self.pos += len;
        Ok(record)
    }

    fn offset(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.data_len {
            return Err(LayerError::Corruption(format!(
                "segment offset {} beyond data block of {} bytes",
                offset, self.data_len
            )));
        }
        self.file.seek(SeekFrom::Start(HEADER_SIZE + offset))?;
        self.pos = offset;
        Ok(())
    }
}
