//! Configuration for layerkv
//!
//! Centralized configuration with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};
use crate::layout::{FieldConfig, Schema, SchemaId, ValueLayout};
use crate::types::{HashTableType, TypeId};

/// Key structure of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// key → value
    #[default]
    Kv,
    /// prefix key → suffix keys → values
    Kkv,
}

/// One sort key of a sorted merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// Index configuration, shared by readers, merges and exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Index name; also the subdirectory written under a merge target
    pub name: String,

    #[serde(default)]
    pub kind: IndexKind,

    // -------------------------------------------------------------------------
    // Value Layout
    // -------------------------------------------------------------------------
    /// Value fields under the current schema
    pub fields: Vec<FieldConfig>,

    /// Current schema id
    #[serde(default)]
    pub schema_id: SchemaId,

    // -------------------------------------------------------------------------
    // Lifetime
    // -------------------------------------------------------------------------
    /// Values older than this many seconds read as absent
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    // -------------------------------------------------------------------------
    // Layout on Disk
    // -------------------------------------------------------------------------
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,

    #[serde(default)]
    pub hash_table: HashTableType,

    /// Prefer 32-bit index offsets while the data block allows it
    #[serde(default = "default_true")]
    pub short_offset: bool,

    /// Sort keys for sorted merges; empty means recency order
    #[serde(default)]
    pub sort_fields: Vec<SortField>,

    /// Keep raw keys in a side segment so exports can recover them
    #[serde(default)]
    pub keep_raw_key: bool,
}

fn default_shard_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "kv".to_string(),
            kind: IndexKind::Kv,
            fields: Vec::new(),
            schema_id: 0,
            ttl_seconds: None,
            shard_count: 1,
            hash_table: HashTableType::Dense,
            short_offset: true,
            sort_fields: Vec::new(),
            keep_raw_key: false,
        }
    }
}

impl IndexConfig {
    /// Create a new config builder
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Load a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: IndexConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(LayerError::Config("shard_count must be positive".to_string()));
        }
        if self.fields.is_empty() {
            return Err(LayerError::Config(format!("index {} has no value fields", self.name)));
        }
        for sort in &self.sort_fields {
            if !self.fields.iter().any(|f| f.name == sort.field) {
                return Err(LayerError::Config(format!(
                    "sort field {} is not a value field",
                    sort.field
                )));
            }
        }
        Ok(())
    }

    /// Layout of the current schema's values
    pub fn value_layout(&self) -> Result<ValueLayout> {
        ValueLayout::new(&self.fields)
    }

    /// The current schema as a history entry
    pub fn current_schema(&self) -> Schema {
        Schema {
            id: self.schema_id,
            fields: self.fields.clone(),
        }
    }

    pub fn ttl_enabled(&self) -> bool {
        self.ttl_seconds.is_some()
    }

    /// Format descriptor for segments of this index
    pub fn type_id(&self) -> Result<TypeId> {
        let layout = self.value_layout()?;
        Ok(TypeId {
            fixed_key: true,
            fixed_value_len: layout.fixed_len().map(|len| len as u32),
            short_offset: self.short_offset,
            hash_table: self.hash_table,
        })
    }
}

/// Builder for IndexConfig
#[derive(Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    /// Set the index name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the key structure
    pub fn kind(mut self, kind: IndexKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Append a value field
    pub fn field(mut self, field: FieldConfig) -> Self {
        self.config.fields.push(field);
        self
    }

    /// Set the current schema id
    pub fn schema_id(mut self, id: SchemaId) -> Self {
        self.config.schema_id = id;
        self
    }

    /// Enable TTL (in seconds)
    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.config.ttl_seconds = Some(ttl);
        self
    }

    /// Set the shard count
    pub fn shard_count(mut self, count: u32) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the hash table flavor
    pub fn hash_table(mut self, table: HashTableType) -> Self {
        self.config.hash_table = table;
        self
    }

    /// Allow or forbid 32-bit index offsets
    pub fn short_offset(mut self, enabled: bool) -> Self {
        self.config.short_offset = enabled;
        self
    }

    /// Append a sort key for sorted merges
    pub fn sort_field(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.config.sort_fields.push(SortField {
            field: field.into(),
            descending,
        });
        self
    }

    /// Keep raw keys alongside their hashes
    pub fn keep_raw_key(mut self, keep: bool) -> Self {
        self.config.keep_raw_key = keep;
        self
    }

    pub fn build(self) -> IndexConfig {
        self.config
    }
}

// =============================================================================
// Reader Options
// =============================================================================

/// Options for opening readers and issuing lookups
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Max in-flight lookups in a batch (0 = one per key)
    pub max_concurrency: usize,

    /// Yield to the runtime between batches of in-flight lookups
    pub yield_between_batches: bool,

    /// Per-call deadline applied when the caller gives no terminator
    pub timeout: Option<Duration>,

    /// Decoded entries cached per disk segment (0 disables the cache)
    pub block_cache_entries: usize,

    /// Check the data CRC when opening a disk segment
    pub verify_checksum: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            yield_between_batches: false,
            timeout: None,
            block_cache_entries: 1024,
            verify_checksum: true,
        }
    }
}

// =============================================================================
// Merge Config
// =============================================================================

/// Memory sizing knobs for merges
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Target hash table occupancy percent (0 = flavor maximum)
    pub target_occupancy_pct: u32,

    /// Read buffer per source segment (bytes)
    pub read_buffer_size: usize,

    /// Write buffer for the target segment (bytes)
    pub write_buffer_size: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            target_occupancy_pct: 0,
            read_buffer_size: 2 * 1024 * 1024, // 2 MB
            write_buffer_size: 4 * 1024 * 1024, // 4 MB
        }
    }
}
