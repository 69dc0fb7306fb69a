//! Value Layout Module
//!
//! Pack value encoding and schema evolution.
//!
//! ## Responsibilities
//! - Describe the fields of a pack value (`ValueLayout`)
//! - Track schema versions and compute ignore fields between them
//! - Convert values written under an older layout into the current one

mod adapter;
mod field;
mod schema;
mod value_layout;

pub use adapter::PackValueAdapter;
pub use field::{FieldConfig, FieldType, FieldValue};
pub use schema::{IgnoreFieldCalculator, Schema, SchemaDiff, SchemaHistory, SchemaId};
pub use value_layout::{FieldEncoding, FieldRef, ValueLayout};
