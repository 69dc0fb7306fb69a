//! Schema history and ignore-field computation
//!
//! Segments written under an older schema id are read through the current
//! layout. A field that was dropped and later re-added between the two ids
//! means something different in the old data, so it is ignored (treated as
//! absent) and filled with its default instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

use super::field::FieldConfig;

/// Monotonically increasing layout version
pub type SchemaId = u32;

/// Value fields in effect under one schema id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub fields: Vec<FieldConfig>,
}

/// Difference between two consecutive schemas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    /// Fields dropped, or redefined under the same name
    pub removed: BTreeSet<String>,
    /// Fields introduced, or redefined under the same name
    pub added: BTreeSet<String>,
}

impl SchemaDiff {
    pub fn between(from: &Schema, to: &Schema) -> Self {
        let mut diff = SchemaDiff::default();
        for old in &from.fields {
            match to.fields.iter().find(|f| f.name == old.name) {
                None => {
                    diff.removed.insert(old.name.clone());
                }
                Some(new) if !same_shape(old, new) => {
                    diff.removed.insert(old.name.clone());
                    diff.added.insert(old.name.clone());
                }
                Some(_) => {}
            }
        }
        for new in &to.fields {
            if !from.fields.iter().any(|f| f.name == new.name) {
                diff.added.insert(new.name.clone());
            }
        }
        diff
    }
}

fn same_shape(a: &FieldConfig, b: &FieldConfig) -> bool {
    a.field_type == b.field_type && a.multi_value == b.multi_value && a.fixed_count == b.fixed_count
}

// =============================================================================
// Schema History
// =============================================================================

/// Ordered sequence of schemas, oldest first
#[derive(Debug, Clone)]
pub struct SchemaHistory {
    schemas: Vec<Schema>,
}

impl SchemaHistory {
    /// Ids must be strictly increasing.
    pub fn new(schemas: Vec<Schema>) -> Result<Self> {
        if schemas.is_empty() {
            return Err(LayerError::Config("schema history is empty".to_string()));
        }
        if schemas.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(LayerError::Config(
                "schema ids must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { schemas })
    }

    /// History holding a single schema
    pub fn single(schema: Schema) -> Self {
        Self {
            schemas: vec![schema],
        }
    }

    pub fn get(&self, id: SchemaId) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.id == id)
    }

    pub fn latest(&self) -> &Schema {
        // non-empty by construction
        &self.schemas[self.schemas.len() - 1]
    }

    fn position(&self, id: SchemaId) -> Result<usize> {
        self.schemas
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| LayerError::InvalidArgs(format!("unknown schema id {}", id)))
    }

    /// Consecutive diffs from `begin` to `end`
    pub fn diffs(&self, begin: SchemaId, end: SchemaId) -> Result<Vec<SchemaDiff>> {
        let (b, e) = (self.position(begin)?, self.position(end)?);
        if b > e {
            return Err(LayerError::InvalidArgs(format!(
                "schema range {}..{} runs backwards",
                begin, end
            )));
        }
        Ok(self.schemas[b..=e]
            .windows(2)
            .map(|w| SchemaDiff::between(&w[0], &w[1]))
            .collect())
    }
}

// =============================================================================
// Ignore-Field Calculator
// =============================================================================

/// Computes ignore-field sets between schema ids, memoized per (begin, end).
#[derive(Debug)]
pub struct IgnoreFieldCalculator {
    history: Arc<SchemaHistory>,
    memo: Mutex<HashMap<(SchemaId, SchemaId), Arc<BTreeSet<String>>>>,
}

impl IgnoreFieldCalculator {
    pub fn new(history: Arc<SchemaHistory>) -> Self {
        Self {
            history,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn history(&self) -> &SchemaHistory {
        &self.history
    }

    /// Fields of a segment written under `begin` that must be treated as
    /// absent when read under `end`.
    pub fn ignore_fields(&self, begin: SchemaId, end: SchemaId) -> Result<Arc<BTreeSet<String>>> {
        if let Some(hit) = self.memo.lock().get(&(begin, end)) {
            return Ok(Arc::clone(hit));
        }

        let fields = Arc::new(self.compute(begin, end)?);
        self.memo.lock().insert((begin, end), Arc::clone(&fields));
        Ok(fields)
    }

    fn compute(&self, begin: SchemaId, end: SchemaId) -> Result<BTreeSet<String>> {
        let diffs = self.history.diffs(begin, end)?;
        let removed: BTreeSet<String> = diffs.into_iter().flat_map(|d| d.removed).collect();

        let present = |id: SchemaId, name: &str| {
            self.history
                .get(id)
                .map(|s| s.fields.iter().any(|f| f.name == name))
                .unwrap_or(false)
        };

        // only fields on both ends matter: the rest are dropped or defaulted anyway
        Ok(removed
            .into_iter()
            .filter(|name| present(begin, name) && present(end, name))
            .collect())
    }
}
