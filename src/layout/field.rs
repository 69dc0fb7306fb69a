//! Field definitions
//!
//! A field is one named, typed slot inside a pack value.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// Scalar type of a field (or of each element of a multi-value field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl FieldType {
    /// Byte width of one element, `None` for strings
    pub fn width(&self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::UInt8 => Some(1),
            FieldType::Int16 | FieldType::UInt16 => Some(2),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => Some(8),
            FieldType::String => None,
        }
    }

    fn is_signed(&self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    fn is_float(&self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }
}

/// Configuration of one value field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub multi_value: bool,
    /// Fixed element count for multi-value fields, or fixed byte length for
    /// strings. Makes the field fixed-width.
    #[serde(default)]
    pub fixed_count: Option<u32>,
    /// Default used when a value written under an older layout lacks the field.
    /// Multi-value defaults are comma separated.
    #[serde(default)]
    pub default_value: Option<String>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            multi_value: false,
            fixed_count: None,
            default_value: None,
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn fixed_count(mut self, count: u32) -> Self {
        self.fixed_count = Some(count);
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

// =============================================================================
// Field Values
// =============================================================================

/// Decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Vec<u8>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Total order used by sorted merges. Values of different kinds compare
    /// by kind.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::UInt(a), FieldValue::UInt(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
            (FieldValue::List(a), FieldValue::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Int(_) => 0,
            FieldValue::UInt(_) => 1,
            FieldValue::Float(_) => 2,
            FieldValue::Str(_) => 3,
            FieldValue::List(_) => 4,
        }
    }
}

/// Encode one scalar element of `field_type` into `out`.
pub(crate) fn encode_scalar(field_type: FieldType, value: &FieldValue, out: &mut Vec<u8>) -> Result<()> {
    let (int, float) = match value {
        FieldValue::Int(v) => (*v as i128, *v as f64),
        FieldValue::UInt(v) => (*v as i128, *v as f64),
        FieldValue::Float(v) => (*v as i128, *v),
        FieldValue::Str(_) | FieldValue::List(_) => {
            return Err(LayerError::InvalidArgs(format!(
                "cannot encode {:?} as {:?}",
                value, field_type
            )))
        }
    };
    match field_type {
        FieldType::Int8 => out.extend_from_slice(&(int as i8).to_le_bytes()),
        FieldType::UInt8 => out.extend_from_slice(&(int as u8).to_le_bytes()),
        FieldType::Int16 => out.extend_from_slice(&(int as i16).to_le_bytes()),
        FieldType::UInt16 => out.extend_from_slice(&(int as u16).to_le_bytes()),
        FieldType::Int32 => out.extend_from_slice(&(int as i32).to_le_bytes()),
        FieldType::UInt32 => out.extend_from_slice(&(int as u32).to_le_bytes()),
        FieldType::Int64 => out.extend_from_slice(&(int as i64).to_le_bytes()),
        FieldType::UInt64 => out.extend_from_slice(&(int as u64).to_le_bytes()),
        FieldType::Float => out.extend_from_slice(&(float as f32).to_le_bytes()),
        FieldType::Double => out.extend_from_slice(&float.to_le_bytes()),
        FieldType::String => {
            return Err(LayerError::InvalidArgs(
                "string is not a scalar element".to_string(),
            ))
        }
    }
    Ok(())
}

/// Decode one scalar element. `bytes` must be exactly `field_type.width()` long.
pub(crate) fn decode_scalar(field_type: FieldType, bytes: &[u8]) -> FieldValue {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    if field_type.is_float() {
        return match field_type {
            FieldType::Float => {
                let mut w = [0u8; 4];
                w.copy_from_slice(&word[..4]);
                FieldValue::Float(f32::from_le_bytes(w) as f64)
            }
            _ => FieldValue::Float(f64::from_le_bytes(word)),
        };
    }
    if field_type.is_signed() {
        let raw = i64::from_le_bytes(word);
        // sign-extend narrow integers
        let shift = 64 - 8 * bytes.len() as u32;
        FieldValue::Int((raw << shift) >> shift)
    } else {
        FieldValue::UInt(u64::from_le_bytes(word))
    }
}

/// Parse a textual default value for `field_type`.
pub(crate) fn parse_scalar(field_type: FieldType, text: &str) -> Result<FieldValue> {
    let text = text.trim();
    let parsed = match field_type {
        FieldType::Float | FieldType::Double => text.parse::<f64>().map(FieldValue::Float).ok(),
        FieldType::String => Some(FieldValue::Str(text.as_bytes().to_vec())),
        t if t.is_signed() => text.parse::<i64>().map(FieldValue::Int).ok(),
        _ => text.parse::<u64>().map(FieldValue::UInt).ok(),
    };
    parsed.ok_or_else(|| {
        LayerError::Config(format!("invalid default value {:?} for {:?}", text, field_type))
    })
}
