//! KV merger
//!
//! Merges source segments of one shard into a single target segment.
//!
//! ## Flow
//! 1. Reject anything but exactly one target
//! 2. Prepare `<target>/<index name>` (removing stale output)
//! 3. Estimate writer memory from source statistics
//! 4. Stream records newest first, filter, dedup and write
//! 5. Dump the writer; on any error remove the partial output

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IndexConfig, IndexKind, MergeConfig};
use crate::error::{LayerError, Result};
use crate::layout::{FieldValue, IgnoreFieldCalculator, ValueLayout};
use crate::segment::{SegmentMeta, SegmentReader, SegmentWriter};
use crate::types::{Locator, Record, SegmentId, SegmentStatus, TypeId};

use super::filter::RecordFilter;
use super::iterator::NewestFirstIterator;
use super::params::MergeParams;

/// Where a merge writes its output
#[derive(Debug, Clone)]
pub struct TargetSegment {
    /// Parent directory; output lands in `<dir>/<index name>`
    pub dir: PathBuf,
    pub segment_id: SegmentId,
    pub locator: Option<Locator>,
}

impl TargetSegment {
    pub fn new(dir: impl Into<PathBuf>, segment_id: SegmentId) -> Self {
        Self {
            dir: dir.into(),
            segment_id,
            locator: None,
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }
}

/// Memory estimate for one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeEstimate {
    /// Sum of source key counts (upper bound on distinct keys)
    pub max_keys: u64,
    /// Hash table bytes at the target occupancy
    pub hash_table_bytes: u64,
    /// Hash table plus values plus read/write buffers
    pub total_bytes: u64,
}

/// Counters from one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub records_read: u64,
    /// Dropped by the TTL filter
    pub records_expired: u64,
    /// Older occurrences of keys already written
    pub duplicates_skipped: u64,
    /// Tombstones and keys shadowed by them, dropped with `drop_delete_key`
    pub deletes_dropped: u64,
    pub keys_written: u64,
    pub tombstones_written: u64,
}

/// Outcome of a successful merge
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub dir: PathBuf,
    pub meta: SegmentMeta,
    pub estimate: MergeEstimate,
    pub stats: MergeStats,
}

/// Merges KV segments of one index
#[derive(Debug)]
pub struct KvMerger {
    config: IndexConfig,
    merge_config: MergeConfig,
    params: MergeParams,
    type_id: TypeId,
    layout: Arc<ValueLayout>,
    calculator: Option<Arc<IgnoreFieldCalculator>>,
}

impl KvMerger {
    /// Validate the index config and parse the string parameters.
    pub fn init(
        config: IndexConfig,
        merge_config: MergeConfig,
        params: &HashMap<String, String>,
    ) -> Result<Self> {
        config.validate()?;
        if config.kind == IndexKind::Kkv {
            return Err(LayerError::Unimplemented(format!(
                "merge of kkv index {}",
                config.name
            )));
        }
        let params = MergeParams::from_map(params, config.ttl_enabled())?;
        let type_id = config.type_id()?;
        let layout = Arc::new(config.value_layout()?);
        tracing::debug!(
            "Initialized merge for {}: drop_delete_key={}, ttl={:?}",
            config.name,
            params.drop_delete_key,
            config.ttl_seconds
        );
        Ok(Self {
            config,
            merge_config,
            params,
            type_id,
            layout,
            calculator: None,
        })
    }

    /// Schema history used to adapt sources written under older schemas
    pub fn with_schema_history(mut self, calculator: Arc<IgnoreFieldCalculator>) -> Self {
        self.calculator = Some(calculator);
        self
    }

    pub fn params(&self) -> &MergeParams {
        &self.params
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Writer memory needed to merge `sources`
    pub fn estimate(&self, sources: &[SegmentReader]) -> MergeEstimate {
        let metas: Vec<SegmentMeta> = sources.iter().map(|s| s.meta()).collect();
        let max_keys: u64 = metas.iter().map(|m| m.stats.key_count).sum();
        let value_bytes: u64 = metas.iter().map(|m| m.stats.value_bytes).sum();

        let max_occupancy = self.type_id.hash_table.max_occupancy();
        let occupancy = match self.merge_config.target_occupancy_pct {
            0 => max_occupancy,
            pct => pct.min(max_occupancy),
        } as u64;
        let slot_bytes = 8 + self.type_id.offset_width() as u64;
        let hash_table_bytes = max_keys * slot_bytes * 100 / occupancy;

        let buffers = self.merge_config.read_buffer_size as u64 * sources.len() as u64
            + self.merge_config.write_buffer_size as u64;
        MergeEstimate {
            max_keys,
            hash_table_bytes,
            total_bytes: hash_table_bytes + value_bytes + buffers,
        }
    }

    /// Merge `sources` (oldest first) into the single target in `targets`.
    pub fn merge(&self, sources: &[SegmentReader], targets: &[TargetSegment]) -> Result<MergeResult> {
        let target = match targets {
            [target] => target,
            _ => {
                return Err(LayerError::Unimplemented(format!(
                    "merge into {} target segments",
                    targets.len()
                )))
            }
        };

        let dir = target.dir.join(&self.config.name);
        prepare_dir(&dir)?;

        match self.merge_into(sources, target, &dir) {
            Ok(result) => {
                tracing::info!(
                    "Merged {} segments of {} into {}: {} keys, {} tombstones, {} duplicates skipped",
                    sources.len(),
                    self.config.name,
                    dir.display(),
                    result.stats.keys_written,
                    result.stats.tombstones_written,
                    result.stats.duplicates_skipped
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!("Merge of {} failed: {}", self.config.name, e);
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    tracing::warn!("Failed to remove partial merge output {}: {}", dir.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn merge_into(
        &self,
        sources: &[SegmentReader],
        target: &TargetSegment,
        dir: &Path,
    ) -> Result<MergeResult> {
        let sources = self.adapt_sources(sources)?;
        let estimate = self.estimate(&sources);
        tracing::debug!(
            "Merge estimate for {}: {} keys max, {} hash table bytes, {} total bytes",
            self.config.name,
            estimate.max_keys,
            estimate.hash_table_bytes,
            estimate.total_bytes
        );

        let filter = match (self.config.ttl_seconds, self.params.current_time) {
            (Some(ttl), Some(now)) => RecordFilter::ttl(ttl, now),
            _ => RecordFilter::pass_all(),
        };

        let mut stats = MergeStats::default();
        let mut writer = SegmentWriter::with_capacity(self.type_id, estimate.max_keys as usize);
        let sorted = !self.config.sort_fields.is_empty();
        let mut survivors = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut deleted_keys: HashSet<u64> = HashSet::new();

        for record in NewestFirstIterator::new(&sources, self.config.keep_raw_key) {
            let record = record?;
            stats.records_read += 1;
            if !filter.keep(&record) {
                stats.records_expired += 1;
                continue;
            }
            let key = record.key.primary();
            if self.params.drop_delete_key {
                if deleted_keys.contains(&key) {
                    stats.deletes_dropped += 1;
                    continue;
                }
                if record.deleted {
                    deleted_keys.insert(key);
                    stats.deletes_dropped += 1;
                    continue;
                }
            }
            if !seen.insert(key) {
                stats.duplicates_skipped += 1;
                continue;
            }
            if sorted {
                survivors.push(record);
            } else {
                write_record(&mut writer, record, &mut stats)?;
            }
        }

        if sorted {
            self.sort_records(&mut survivors)?;
            for record in survivors {
                write_record(&mut writer, record, &mut stats)?;
            }
        }

        let mut meta = SegmentMeta::new(
            target.segment_id,
            self.config.schema_id,
            SegmentStatus::Built,
            self.type_id,
        );
        meta.locator = target.locator;
        meta.sorted = sorted;
        let meta = writer.dump(dir, meta)?;

        Ok(MergeResult {
            dir: dir.to_path_buf(),
            meta,
            estimate,
            stats,
        })
    }

    fn adapt_sources(&self, sources: &[SegmentReader]) -> Result<Vec<SegmentReader>> {
        let schema = self.config.current_schema();
        sources
            .iter()
            .map(|source| {
                let schema_id = source.meta().schema_id;
                if schema_id == schema.id {
                    return Ok(source.clone());
                }
                let calculator = self.calculator.as_ref().ok_or_else(|| {
                    LayerError::InvalidArgs(format!(
                        "source segment {} uses schema {} but no schema history was given",
                        source.meta().id,
                        schema_id
                    ))
                })?;
                source.clone().adapt(calculator, &schema)
            })
            .collect()
    }

    /// Order by the configured sort fields; tombstones go last.
    fn sort_records(&self, records: &mut Vec<Record>) -> Result<()> {
        let mut keyed = Vec::with_capacity(records.len());
        for record in records.drain(..) {
            let sort_key = if record.deleted {
                None
            } else {
                let mut values = Vec::with_capacity(self.config.sort_fields.len());
                for sort in &self.config.sort_fields {
                    values.push(self.layout.decode_field(&record.value, &sort.field)?);
                }
                Some(values)
            };
            keyed.push((sort_key, record));
        }

        keyed.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => self.compare_sort_keys(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        records.extend(keyed.into_iter().map(|(_, record)| record));
        Ok(())
    }

    fn compare_sort_keys(&self, a: &[Option<FieldValue>], b: &[Option<FieldValue>]) -> Ordering {
        for ((x, y), sort) in a.iter().zip(b).zip(&self.config.sort_fields) {
            let ord = match (x, y) {
                (Some(x), Some(y)) => x.sort_cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = if sort.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn write_record(writer: &mut SegmentWriter, record: Record, stats: &mut MergeStats) -> Result<()> {
    let key = record.key.primary();
    if record.deleted {
        writer.delete(key, record.timestamp)?;
        stats.tombstones_written += 1;
    } else {
        writer.add(key, record.value, record.timestamp)?;
        stats.keys_written += 1;
    }
    if let Some(raw) = record.raw_key {
        writer.add_raw_key(key, raw);
    }
    Ok(())
}

/// Remove stale output and recreate the directory
fn prepare_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        tracing::debug!("Removing stale merge output {}", dir.display());
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
