//! Schema-adapted segment access
//!
//! Wraps a segment written under an older schema so values come out in the
//! reader's current layout. Tombstones pass through untouched.

use std::sync::Arc;

use crate::error::{LayerError, Result};
use crate::layout::{IgnoreFieldCalculator, PackValueAdapter, Schema};
use crate::reader::{ReadMetrics, TimeoutTerminator};
use crate::types::{KeyHash, Record};

use super::{Lookup, LookupStatus, RecordIterator, SegmentReader};

/// A segment reader whose values are converted on the way out
#[derive(Debug, Clone)]
pub struct AdaptedReader {
    inner: SegmentReader,
    adapter: Arc<PackValueAdapter>,
}

impl AdaptedReader {
    pub fn new(inner: SegmentReader, adapter: Arc<PackValueAdapter>) -> Self {
        Self { inner, adapter }
    }

    pub fn inner(&self) -> &SegmentReader {
        &self.inner
    }

    pub async fn get(
        &self,
        key: KeyHash,
        terminator: Option<&TimeoutTerminator>,
        metrics: Option<&mut ReadMetrics>,
    ) -> Lookup {
        let mut lookup = self.inner.get(key, terminator, metrics).await;
        if lookup.status != LookupStatus::Found {
            return lookup;
        }
        let Some(value) = lookup.value.take() else {
            return Lookup::fail();
        };
        match self.adapter.convert(&value) {
            Ok(converted) => Lookup::found(converted, lookup.timestamp),
            Err(e) => {
                tracing::warn!("Value conversion failed for key {:016x}: {}", key, e);
                Lookup::fail()
            }
        }
    }

    pub fn create_iterator(&self) -> Result<Box<dyn RecordIterator>> {
        Ok(Box::new(AdaptedIterator {
            inner: self.inner.create_iterator()?,
            adapter: Arc::clone(&self.adapter),
        }))
    }
}

/// Iterator converting every live value it yields
pub struct AdaptedIterator {
    inner: Box<dyn RecordIterator>,
    adapter: Arc<PackValueAdapter>,
}

impl RecordIterator for AdaptedIterator {
    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Record> {
        let mut record = self.inner.next()?;
        if !record.deleted {
            record.value = self.adapter.convert(&record.value)?;
        }
        Ok(record)
    }

    fn offset(&self) -> u64 {
        self.inner.offset()
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(offset)
    }
}

impl SegmentReader {
    /// Wrap this reader so its values come out under `target`.
    ///
    /// Returns the reader unchanged when the segment already uses the target
    /// schema or the layouts line up after ignore fields are applied.
    pub fn adapt(self, calculator: &IgnoreFieldCalculator, target: &Schema) -> Result<Self> {
        let schema_id = self.meta().schema_id;
        if schema_id == target.id {
            return Ok(self);
        }
        let source = calculator.history().get(schema_id).ok_or_else(|| {
            LayerError::InvalidArgs(format!("segment schema {} not in history", schema_id))
        })?;
        let ignore = calculator.ignore_fields(schema_id, target.id)?;
        let adapter = PackValueAdapter::init(&source.fields, &target.fields, &ignore)?;
        if !adapter.needs_conversion() {
            return Ok(self);
        }
        tracing::debug!(
            "Adapting segment {} from schema {} to {}",
            self.meta().id,
            schema_id,
            target.id
        );
        Ok(SegmentReader::Adapted(Box::new(AdaptedReader::new(
            self,
            Arc::new(adapter),
        ))))
    }
}
