//! Value Layout
//!
//! Encodes and splits pack values.
//!
//! ## Encoding
//! ```text
//! fixed layout:     [field 0][field 1]...[field n]          (raw, fixed width)
//! variable layout:  [varint body_len][field 0]...[field n]
//!     fixed field:   raw bytes
//!     string:        [varint len][bytes]
//!     multi-value:   [varint count][count * element width]
//! ```

use bytes::Bytes;

use crate::error::{LayerError, Result};

use super::field::{decode_scalar, encode_scalar, parse_scalar, FieldConfig, FieldType, FieldValue};

// =============================================================================
// Varint
// =============================================================================

pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Returns (value, bytes consumed)
pub(crate) fn read_varint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(LayerError::Corruption("truncated varint".to_string()))
}

/// `prefix + count * width` as a byte length, or `Corruption` if it overflows
fn prefixed_len(prefix: usize, count: u64, width: usize) -> Result<usize> {
    usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(width))
        .and_then(|body| body.checked_add(prefix))
        .ok_or_else(|| LayerError::Corruption(format!("length prefix {} overflows", count)))
}

// =============================================================================
// Field References
// =============================================================================

/// How a field is laid out inside the pack value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Raw bytes of a known width
    Fixed(usize),
    /// Length-prefixed string
    VarString,
    /// Count-prefixed list of fixed-width elements
    VarMulti { elem_width: usize },
}

/// Resolved reference to one field of a layout
#[derive(Debug, Clone)]
pub struct FieldRef {
    pub name: String,
    pub field_type: FieldType,
    pub multi_value: bool,
    pub encoding: FieldEncoding,
    /// Encoded default, used when converting from a layout lacking the field
    pub default_bytes: Bytes,
}

impl FieldRef {
    fn from_config(config: &FieldConfig) -> Result<Self> {
        let encoding = match (config.field_type.width(), config.multi_value, config.fixed_count) {
            (Some(w), false, _) => FieldEncoding::Fixed(w),
            (Some(w), true, Some(count)) => FieldEncoding::Fixed(w * count as usize),
            (Some(w), true, None) => FieldEncoding::VarMulti { elem_width: w },
            (None, false, Some(len)) => FieldEncoding::Fixed(len as usize),
            (None, false, None) => FieldEncoding::VarString,
            (None, true, _) => {
                return Err(LayerError::Config(format!(
                    "field {}: multi-value strings are not supported in pack values",
                    config.name
                )))
            }
        };

        let mut field = Self {
            name: config.name.clone(),
            field_type: config.field_type,
            multi_value: config.multi_value,
            encoding,
            default_bytes: Bytes::new(),
        };
        field.default_bytes = Bytes::from(field.encode_default(config.default_value.as_deref())?);
        Ok(field)
    }

    fn encode_default(&self, text: Option<&str>) -> Result<Vec<u8>> {
        let value = match text {
            None => None,
            Some(t) if self.multi_value => Some(FieldValue::List(
                t.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| parse_scalar(self.field_type, s))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Some(t) => Some(parse_scalar(self.field_type, t)?),
        };
        let mut out = Vec::new();
        match value {
            Some(v) => self.encode(&v, &mut out)?,
            None => self.encode_zero(&mut out),
        }
        Ok(out)
    }

    fn encode_zero(&self, out: &mut Vec<u8>) {
        match self.encoding {
            FieldEncoding::Fixed(width) => out.resize(out.len() + width, 0),
            FieldEncoding::VarString | FieldEncoding::VarMulti { .. } => write_varint(0, out),
        }
    }

    /// Encode a typed value for this field.
    pub fn encode(&self, value: &FieldValue, out: &mut Vec<u8>) -> Result<()> {
        match (self.encoding, value) {
            (FieldEncoding::Fixed(width), FieldValue::Str(s)) if self.field_type == FieldType::String => {
                let start = out.len();
                out.extend_from_slice(&s[..s.len().min(width)]);
                out.resize(start + width, 0);
            }
            (FieldEncoding::Fixed(width), FieldValue::List(items)) => {
                let start = out.len();
                for item in items {
                    encode_scalar(self.field_type, item, out)?;
                }
                // pad or cut to the fixed element count
                out.resize(start + width, 0);
            }
            (FieldEncoding::Fixed(_), scalar) => encode_scalar(self.field_type, scalar, out)?,
            (FieldEncoding::VarString, FieldValue::Str(s)) => {
                write_varint(s.len() as u64, out);
                out.extend_from_slice(s);
            }
            (FieldEncoding::VarMulti { .. }, FieldValue::List(items)) => {
                write_varint(items.len() as u64, out);
                for item in items {
                    encode_scalar(self.field_type, item, out)?;
                }
            }
            (_, other) => {
                return Err(LayerError::InvalidArgs(format!(
                    "field {}: cannot encode {:?}",
                    self.name, other
                )))
            }
        }
        Ok(())
    }

    /// Decode this field's encoded slice (as returned by [`ValueLayout::split`]).
    pub fn decode(&self, bytes: &[u8]) -> Result<FieldValue> {
        match self.encoding {
            FieldEncoding::Fixed(_) if self.field_type == FieldType::String => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Ok(FieldValue::Str(bytes[..end].to_vec()))
            }
            FieldEncoding::Fixed(width) if self.multi_value => {
                let elem = self.field_type.width().unwrap_or(1).max(1);
                Ok(FieldValue::List(
                    bytes[..width]
                        .chunks_exact(elem)
                        .map(|c| decode_scalar(self.field_type, c))
                        .collect(),
                ))
            }
            FieldEncoding::Fixed(_) => Ok(decode_scalar(self.field_type, bytes)),
            FieldEncoding::VarString => {
                let (len, used) = read_varint(bytes)?;
                let end = prefixed_len(used, len, 1)?;
                let text = bytes.get(used..end).ok_or_else(|| {
                    LayerError::Corruption(format!("field {} overruns its slice", self.name))
                })?;
                Ok(FieldValue::Str(text.to_vec()))
            }
            FieldEncoding::VarMulti { elem_width } => {
                let (_, used) = read_varint(bytes)?;
                Ok(FieldValue::List(
                    bytes[used..]
                        .chunks_exact(elem_width)
                        .map(|c| decode_scalar(self.field_type, c))
                        .collect(),
                ))
            }
        }
    }

    /// Length of this field's encoding at the start of `bytes`
    fn encoded_len(&self, bytes: &[u8]) -> Result<usize> {
        let len = match self.encoding {
            FieldEncoding::Fixed(width) => width,
            FieldEncoding::VarString => {
                let (len, used) = read_varint(bytes)?;
                prefixed_len(used, len, 1)?
            }
            FieldEncoding::VarMulti { elem_width } => {
                let (count, used) = read_varint(bytes)?;
                prefixed_len(used, count, elem_width)?
            }
        };
        if len > bytes.len() {
            return Err(LayerError::Corruption(format!(
                "field {} overruns pack value ({} > {})",
                self.name,
                len,
                bytes.len()
            )));
        }
        Ok(len)
    }
}

// =============================================================================
// Value Layout
// =============================================================================

/// Field-reference table for one schema's value fields
#[derive(Debug, Clone)]
pub struct ValueLayout {
    fields: Vec<FieldRef>,
    /// Total byte length when every field is fixed-width
    fixed_len: Option<usize>,
    /// Single fixed-width scalar stored raw
    simple: bool,
}

impl ValueLayout {
    /// Build the field-reference table. Fails on an empty field list or an
    /// unsupported field shape.
    pub fn new(fields: &[FieldConfig]) -> Result<Self> {
        if fields.is_empty() {
            return Err(LayerError::Config("value layout has no fields".to_string()));
        }
        let refs = fields
            .iter()
            .map(FieldRef::from_config)
            .collect::<Result<Vec<_>>>()?;

        let fixed_len = refs.iter().try_fold(0usize, |acc, f| match f.encoding {
            FieldEncoding::Fixed(w) => Some(acc + w),
            _ => None,
        });
        let simple = refs.len() == 1
            && !refs[0].multi_value
            && refs[0].field_type != FieldType::String;

        Ok(Self {
            fields: refs,
            fixed_len,
            simple,
        })
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn fixed_len(&self) -> Option<usize> {
        self.fixed_len
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// Split a pack value into its per-field encoded slices.
    pub fn split<'a>(&self, value: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let body = match self.fixed_len {
            Some(len) => {
                if value.len() != len {
                    return Err(LayerError::Corruption(format!(
                        "fixed pack value has {} bytes, expected {}",
                        value.len(),
                        len
                    )));
                }
                value
            }
            None => {
                let (body_len, used) = read_varint(value)?;
                let end = prefixed_len(used, body_len, 1)?;
                if end != value.len() {
                    return Err(LayerError::Corruption(format!(
                        "pack value length prefix {} does not match {} body bytes",
                        body_len,
                        value.len() - used
                    )));
                }
                &value[used..]
            }
        };

        let mut slices = Vec::with_capacity(self.fields.len());
        let mut pos = 0;
        for field in &self.fields {
            let len = field.encoded_len(&body[pos..])?;
            slices.push(&body[pos..pos + len]);
            pos += len;
        }
        if pos != body.len() {
            return Err(LayerError::Corruption(format!(
                "{} trailing bytes after last field",
                body.len() - pos
            )));
        }
        Ok(slices)
    }

    /// Assemble a pack value from per-field encoded slices in layout order.
    pub fn assemble(&self, slices: &[&[u8]], out: &mut Vec<u8>) {
        if self.fixed_len.is_none() {
            let body_len: usize = slices.iter().map(|s| s.len()).sum();
            write_varint(body_len as u64, out);
        }
        for slice in slices {
            out.extend_from_slice(slice);
        }
    }

    /// Encode named values; fields not given take their default.
    pub fn encode(&self, values: &[(&str, FieldValue)]) -> Result<Bytes> {
        let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let mut buf = Vec::new();
            match values.iter().find(|(name, _)| *name == field.name) {
                Some((_, value)) => field.encode(value, &mut buf)?,
                None => buf.extend_from_slice(&field.default_bytes),
            }
            encoded.push(buf);
        }
        for (name, _) in values {
            if self.field_index(name).is_none() {
                return Err(LayerError::InvalidArgs(format!("unknown field {}", name)));
            }
        }
        let slices: Vec<&[u8]> = encoded.iter().map(|v| v.as_slice()).collect();
        let mut out = Vec::new();
        self.assemble(&slices, &mut out);
        Ok(Bytes::from(out))
    }

    /// Decode a single named field, `None` if the layout lacks it.
    pub fn decode_field(&self, value: &[u8], name: &str) -> Result<Option<FieldValue>> {
        let Some(idx) = self.field_index(name) else {
            return Ok(None);
        };
        let slices = self.split(value)?;
        self.fields[idx].decode(slices[idx]).map(Some)
    }
}
