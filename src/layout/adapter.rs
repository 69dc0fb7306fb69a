//! Pack value adapter
//!
//! Re-serializes values written under a segment's layout into the layout
//! the reader expects:
//! - fields in both layouts and not ignored are copied
//! - fields only in the target take their default
//! - fields only in the source are dropped

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{LayerError, Result};

use super::field::FieldConfig;
use super::value_layout::ValueLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldSource {
    /// Index of the field in the source layout
    Copy(usize),
    Default,
}

/// Converts values between two layouts
#[derive(Debug)]
pub struct PackValueAdapter {
    source: Arc<ValueLayout>,
    target: Arc<ValueLayout>,
    plan: Vec<FieldSource>,
    needs_conversion: bool,
}

impl PackValueAdapter {
    /// Build an adapter from the segment's fields to the reader's fields.
    pub fn init(
        segment_fields: &[FieldConfig],
        target_fields: &[FieldConfig],
        ignore_fields: &BTreeSet<String>,
    ) -> Result<Self> {
        let source = Arc::new(ValueLayout::new(segment_fields)?);
        let target = Arc::new(ValueLayout::new(target_fields)?);
        Self::with_layouts(source, target, ignore_fields)
    }

    pub fn with_layouts(
        source: Arc<ValueLayout>,
        target: Arc<ValueLayout>,
        ignore_fields: &BTreeSet<String>,
    ) -> Result<Self> {
        if source.fixed_len() != target.fixed_len() && (source.is_simple() || target.is_simple()) {
            return Err(LayerError::Unimplemented(format!(
                "cannot adapt simple value layout across fixed length change ({:?} -> {:?}, ignore fields {:?})",
                source.fixed_len(),
                target.fixed_len(),
                ignore_fields
            )));
        }

        let mut plan = Vec::with_capacity(target.fields().len());
        for field in target.fields() {
            let from = match source.field_index(&field.name) {
                Some(_) if ignore_fields.contains(&field.name) => FieldSource::Default,
                Some(idx) => {
                    let src = &source.fields()[idx];
                    if src.encoding != field.encoding || src.field_type != field.field_type {
                        return Err(LayerError::Config(format!(
                            "field {} changed shape without being ignored",
                            field.name
                        )));
                    }
                    FieldSource::Copy(idx)
                }
                None => FieldSource::Default,
            };
            plan.push(from);
        }

        let identity = plan.len() == source.fields().len()
            && plan
                .iter()
                .enumerate()
                .all(|(i, from)| *from == FieldSource::Copy(i));
        let needs_conversion = !identity || source.fixed_len() != target.fixed_len();

        Ok(Self {
            source,
            target,
            plan,
            needs_conversion,
        })
    }

    /// True if field sets or order differ once ignore fields are applied
    pub fn needs_conversion(&self) -> bool {
        self.needs_conversion
    }

    pub fn target(&self) -> &Arc<ValueLayout> {
        &self.target
    }

    /// Convert one live value. Tombstones carry no value and are never converted.
    pub fn convert(&self, value: &[u8]) -> Result<Bytes> {
        if !self.needs_conversion {
            return Ok(Bytes::copy_from_slice(value));
        }
        let mut out = Vec::with_capacity(value.len() + 8);
        self.convert_into(value, &mut out)?;
        Ok(Bytes::from(out))
    }

    /// Convert into a caller-owned buffer
    pub fn convert_into(&self, value: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if !self.needs_conversion {
            out.extend_from_slice(value);
            return Ok(());
        }
        let source_slices = self.source.split(value)?;
        let slices: Vec<&[u8]> = self
            .plan
            .iter()
            .zip(self.target.fields())
            .map(|(from, field)| match from {
                FieldSource::Copy(idx) => source_slices[*idx],
                FieldSource::Default => field.default_bytes.as_ref(),
            })
            .collect();
        self.target.assemble(&slices, out);
        Ok(())
    }
}
