//! Schema-adapted segment tests

use std::sync::Arc;

use bytes::Bytes;
use layerkv::layout::{
    FieldConfig, FieldType, FieldValue, IgnoreFieldCalculator, Schema, SchemaHistory, ValueLayout,
};
use layerkv::segment::{LookupStatus, SegmentMeta, SegmentReader, SegmentWriter};
use layerkv::types::SegmentStatus;
use layerkv::{IndexConfig, LayerError};
use tempfile::TempDir;

use super::open;

// =============================================================================
// Helper Functions
// =============================================================================

fn old_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new("a", FieldType::Int32),
        FieldConfig::new("b", FieldType::String),
    ]
}

fn new_fields() -> Vec<FieldConfig> {
    vec![
        FieldConfig::new("a", FieldType::Int32),
        FieldConfig::new("c", FieldType::Int64).default_value("7"),
    ]
}

fn calculator() -> IgnoreFieldCalculator {
    let history = SchemaHistory::new(vec![
        Schema {
            id: 0,
            fields: old_fields(),
        },
        Schema {
            id: 1,
            fields: new_fields(),
        },
    ])
    .unwrap();
    IgnoreFieldCalculator::new(Arc::new(history))
}

/// One-key segment written under schema 0
fn write_old_segment(dir: &std::path::Path) -> Bytes {
    let config = old_fields()
        .into_iter()
        .fold(IndexConfig::builder(), |b, f| b.field(f))
        .build();
    let layout = ValueLayout::new(&old_fields()).unwrap();
    let value = layout
        .encode(&[("a", FieldValue::Int(42)), ("b", FieldValue::Str(b"hi".to_vec()))])
        .unwrap();
    let type_id = config.type_id().unwrap();
    let mut writer = SegmentWriter::new(type_id);
    writer.add(1, value.clone(), 5).unwrap();
    writer.delete(2, 6).unwrap();
    writer
        .dump(dir, SegmentMeta::new(1, 0, SegmentStatus::Built, type_id))
        .unwrap();
    value
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_get_converts_to_target_layout() {
    let temp = TempDir::new().unwrap();
    write_old_segment(temp.path());
    let target = Schema {
        id: 1,
        fields: new_fields(),
    };
    let reader = open(temp.path()).adapt(&calculator(), &target).unwrap();
    assert!(matches!(reader, SegmentReader::Adapted(_)));

    let lookup = reader.get(1, None, None).await;
    assert_eq!(lookup.status, LookupStatus::Found);
    assert_eq!(lookup.timestamp, 5);

    let layout = ValueLayout::new(&new_fields()).unwrap();
    let value = lookup.value.unwrap();
    assert_eq!(layout.decode_field(&value, "a").unwrap(), Some(FieldValue::Int(42)));
    assert_eq!(layout.decode_field(&value, "c").unwrap(), Some(FieldValue::Int(7)));

    assert_eq!(reader.get(2, None, None).await.status, LookupStatus::Deleted);
}

#[test]
fn test_iterator_converts_live_values_only() {
    let temp = TempDir::new().unwrap();
    write_old_segment(temp.path());
    let target = Schema {
        id: 1,
        fields: new_fields(),
    };
    let reader = open(temp.path()).adapt(&calculator(), &target).unwrap();
    let layout = ValueLayout::new(&new_fields()).unwrap();

    let mut iter = reader.create_iterator().unwrap();
    let live = iter.next().unwrap();
    assert_eq!(live.value.len(), layout.fixed_len().unwrap());
    let tombstone = iter.next().unwrap();
    assert!(tombstone.deleted);
    assert!(tombstone.value.is_empty());
}

#[test]
fn test_same_schema_is_not_wrapped() {
    let temp = TempDir::new().unwrap();
    write_old_segment(temp.path());
    let target = Schema {
        id: 0,
        fields: old_fields(),
    };
    let reader = open(temp.path()).adapt(&calculator(), &target).unwrap();
    assert!(matches!(reader, SegmentReader::Disk(_)));
}

#[test]
fn test_unknown_schema_rejected() {
    let temp = TempDir::new().unwrap();
    write_old_segment(temp.path());
    let history = SchemaHistory::single(Schema {
        id: 1,
        fields: new_fields(),
    });
    let calc = IgnoreFieldCalculator::new(Arc::new(history));
    let target = Schema {
        id: 1,
        fields: new_fields(),
    };
    assert!(matches!(
        open(temp.path()).adapt(&calc, &target),
        Err(LayerError::InvalidArgs(_))
    ));
}
