//! Record schema, scalar values, and the byte layout that maps one to
//! the other.
//!
//! Per-field serialization of an ordered list of named, independently
//! typed properties. The dynamic form (`Item` as a property-name map)
//! is the primitive; `static_bucket.rs` layers a typed convenience API
//! on top without any runtime reflection.

use std::collections::HashMap;

use crate::common::{Result, StoreError};
use crate::string_heap::{EMPTY_SENTINEL, NULL_SENTINEL, StringHeap};

/// The scalar kind of one schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PropertyKind {
    Int32,
    Int64,
    Boolean,
    Single,
    Double,
    DateTime,
    TimeSpan,
    Guid,
    String,
    FixedSizeByteArray(u16),
}

impl PropertyKind {
    /// On-disk width in bytes for this kind.
    pub fn width(&self) -> usize {
        match self {
            PropertyKind::Int32 => 4,
            PropertyKind::Int64 => 8,
            PropertyKind::Boolean => 1,
            PropertyKind::Single => 4,
            PropertyKind::Double => 8,
            PropertyKind::DateTime => 8,
            PropertyKind::TimeSpan => 8,
            PropertyKind::Guid => 16,
            PropertyKind::String => 12,
            PropertyKind::FixedSizeByteArray(n) => *n as usize,
        }
    }
}

/// One named, typed field in a schema.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An ordered list of properties. The record width is fixed for the
/// lifetime of a store once a `Schema` is chosen.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    properties: Vec<Property>,
}

impl Schema {
    pub fn new(properties: Vec<Property>) -> Self {
        Self { properties }
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// The constant per-record byte width `W`.
    pub fn record_width(&self) -> usize {
        self.properties.iter().map(|p| p.kind.width()).sum()
    }

    fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Validates that `item` carries exactly the declared properties,
    /// per the `SchemaMismatch` error kind.
    pub fn validate_item(&self, item: &Item) -> Result<()> {
        for prop in &self.properties {
            if !item.0.contains_key(&prop.name) {
                return Err(StoreError::MissingProperty {
                    property: prop.name.clone(),
                });
            }
        }
        for key in item.0.keys() {
            if self.property(key).is_none() {
                return Err(StoreError::UnknownProperty {
                    property: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A scalar value for one property.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Boolean(bool),
    Single(f32),
    Double(f64),
    DateTime(i64),
    TimeSpan(i64),
    Guid([u8; 16]),
    /// `None` is the null string; `Some(s)` with `s.is_empty()` is the
    /// empty string. This makes null and empty losslessly
    /// distinguishable without a third enum arm.
    String(Option<String>),
    Bytes(Vec<u8>),
}

/// One record, addressed by property name. Property order is dictated
/// by the `Schema` at encode/decode time, not stored in the item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item(pub HashMap<String, Value>);

impl Item {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

impl From<HashMap<String, Value>> for Item {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

/// A non-sentinel string payload pending heap allocation, tagged with
/// where its offset/length belong in the record buffer.
struct PendingString {
    field_offset: usize,
    bytes: Vec<u8>,
}

/// Serializes `items` into one `W`-byte-per-record buffer, allocating
/// every non-sentinel string payload via a single `append_many` call
/// on `heap`.
pub fn encode_records(schema: &Schema, items: &[Item], heap: &StringHeap) -> Result<Vec<u8>> {
    let width = schema.record_width();
    let mut buffer = vec![0u8; width * items.len()];
    let mut pending = Vec::new();

    for (item_idx, item) in items.iter().enumerate() {
        schema.validate_item(item)?;
        let record_start = item_idx * width;
        let mut field_offset = record_start;

        for prop in schema.properties() {
            let value = item.get(&prop.name).expect("validated above");
            match (&prop.kind, value) {
                (PropertyKind::Int32, Value::Int32(v)) => {
                    buffer[field_offset..field_offset + 4].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::Int64, Value::Int64(v)) => {
                    buffer[field_offset..field_offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::Boolean, Value::Boolean(v)) => {
                    buffer[field_offset] = if *v { 1 } else { 0 };
                }
                (PropertyKind::Single, Value::Single(v)) => {
                    buffer[field_offset..field_offset + 4].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::Double, Value::Double(v)) => {
                    buffer[field_offset..field_offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::DateTime, Value::DateTime(v)) => {
                    buffer[field_offset..field_offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::TimeSpan, Value::TimeSpan(v)) => {
                    buffer[field_offset..field_offset + 8].copy_from_slice(&v.to_le_bytes());
                }
                (PropertyKind::Guid, Value::Guid(v)) => {
                    buffer[field_offset..field_offset + 16].copy_from_slice(v);
                }
                (PropertyKind::FixedSizeByteArray(n), Value::Bytes(v)) => {
                    let n = *n as usize;
                    let copy_len = v.len().min(n);
                    buffer[field_offset..field_offset + copy_len]
                        .copy_from_slice(&v[..copy_len]);
                    // Remaining bytes stay zero-padded.
                }
                (PropertyKind::String, Value::String(s)) => match s {
                    None => write_string_offset_len(
                        &mut buffer,
                        field_offset,
                        NULL_SENTINEL,
                        0,
                    ),
                    Some(s) if s.is_empty() => write_string_offset_len(
                        &mut buffer,
                        field_offset,
                        EMPTY_SENTINEL,
                        0,
                    ),
                    Some(s) => pending.push(PendingString {
                        field_offset,
                        bytes: s.clone().into_bytes(),
                    }),
                },
                (kind, value) => {
                    return Err(StoreError::DecodeError {
                        message: format!(
                            "value for `{}` does not match declared kind {:?}: {:?}",
                            prop.name, kind, value
                        ),
                    });
                }
            }
            field_offset += prop.kind.width();
        }
    }

    if !pending.is_empty() {
        let payloads: Vec<Vec<u8>> = pending.iter().map(|p| p.bytes.clone()).collect();
        let saved = heap.append_many(&payloads)?;
        for (p, s) in pending.iter().zip(saved.iter()) {
            write_string_offset_len(&mut buffer, p.field_offset, s.offset, s.length);
        }
    }

    Ok(buffer)
}

fn write_string_offset_len(buffer: &mut [u8], field_offset: usize, offset: i64, length: u32) {
    buffer[field_offset..field_offset + 8].copy_from_slice(&offset.to_le_bytes());
    buffer[field_offset + 8..field_offset + 12].copy_from_slice(&length.to_le_bytes());
}

/// Decodes one `W`-byte record slice into an `Item`, loading string
/// fields from `heap`.
pub fn decode_record(schema: &Schema, bytes: &[u8], heap: &StringHeap) -> Result<Item> {
    let mut item = Item::new();
    let mut field_offset = 0usize;

    for prop in schema.properties() {
        let width = prop.kind.width();
        let field = &bytes[field_offset..field_offset + width];
        let value = match prop.kind {
            PropertyKind::Int32 => Value::Int32(i32::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::Int64 => Value::Int64(i64::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::Boolean => Value::Boolean(field[0] != 0),
            PropertyKind::Single => Value::Single(f32::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::Double => Value::Double(f64::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::DateTime => Value::DateTime(i64::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::TimeSpan => Value::TimeSpan(i64::from_le_bytes(field.try_into().unwrap())),
            PropertyKind::Guid => {
                let mut g = [0u8; 16];
                g.copy_from_slice(field);
                Value::Guid(g)
            }
            PropertyKind::FixedSizeByteArray(_) => Value::Bytes(field.to_vec()),
            PropertyKind::String => {
                let offset = i64::from_le_bytes(field[0..8].try_into().unwrap());
                let length = u32::from_le_bytes(field[8..12].try_into().unwrap());
                Value::String(heap.load(offset, length)?)
            }
        };
        item = item.with(prop.name.clone(), value);
        field_offset += width;
    }

    Ok(item)
}

/// Decodes a contiguous buffer of `count` records in order.
pub fn decode_records(schema: &Schema, bytes: &[u8], heap: &StringHeap) -> Result<Vec<Item>> {
    let width = schema.record_width();
    let count = bytes.len() / width;
    (0..count)
        .map(|i| decode_record(schema, &bytes[i * width..(i + 1) * width], heap))
        .collect()
}

/// Renders a partition key value as the directory-name string used by
/// the [`crate::partitioner::Partitioner`].
pub fn partition_key_string(value: &Value) -> Result<String> {
    match value {
        Value::Int32(v) => Ok(v.to_string()),
        Value::Int64(v) => Ok(v.to_string()),
        Value::String(Some(s)) => Ok(s.clone()),
        Value::String(None) => Ok("null".to_string()),
        other => Err(StoreError::DecodeError {
            message: format!("value {other:?} cannot be used as a partition key"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Property::new("MyNumber1", PropertyKind::Int32),
            Property::new("MyString1", PropertyKind::String),
            Property::new("MyNumber2", PropertyKind::Int32),
            Property::new("MyBoolean1", PropertyKind::Boolean),
            Property::new("MyString2", PropertyKind::String),
        ])
    }

    fn heap(dir: &tempfile::TempDir) -> StringHeap {
        StringHeap::open(
            dir.path().join("strings.bin"),
            crate::paged_cache::CacheConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn record_width_matches_spec_table() {
        let schema = sample_schema();
        // 4 + 12 + 4 + 1 + 12
        assert_eq!(schema.record_width(), 33);
    }

    #[test]
    fn round_trips_numbers_and_strings() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let heap = heap(&dir);

        let item = Item::new()
            .with("MyNumber1", Value::Int32(7))
            .with("MyString1", Value::String(Some("hello".to_string())))
            .with("MyNumber2", Value::Int32(70))
            .with("MyBoolean1", Value::Boolean(true))
            .with("MyString2", Value::String(Some("world".to_string())));

        let buf = encode_records(&schema, &[item.clone()], &heap).unwrap();
        let decoded = decode_record(&schema, &buf, &heap).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn null_and_empty_strings_distinguished() {
        let dir = tempdir().unwrap();
        let schema = sample_schema();
        let heap = heap(&dir);

        let item = Item::new()
            .with("MyNumber1", Value::Int32(1))
            .with("MyString1", Value::String(None))
            .with("MyNumber2", Value::Int32(2))
            .with("MyBoolean1", Value::Boolean(false))
            .with("MyString2", Value::String(Some(String::new())));

        let before = heap.next_free_offset();
        let buf = encode_records(&schema, &[item.clone()], &heap).unwrap();
        assert_eq!(heap.next_free_offset(), before);

        let decoded = decode_record(&schema, &buf, &heap).unwrap();
        assert_eq!(decoded.get("MyString1"), Some(&Value::String(None)));
        assert_eq!(
            decoded.get("MyString2"),
            Some(&Value::String(Some(String::new())))
        );
    }

    #[test]
    fn missing_property_is_schema_mismatch() {
        let schema = sample_schema();
        let item = Item::new().with("MyNumber1", Value::Int32(1));
        assert!(schema.validate_item(&item).is_err());
    }

    #[test]
    fn unknown_property_is_schema_mismatch() {
        let schema = sample_schema();
        let mut item = Item::new()
            .with("MyNumber1", Value::Int32(1))
            .with("MyString1", Value::String(None))
            .with("MyNumber2", Value::Int32(2))
            .with("MyBoolean1", Value::Boolean(false))
            .with("MyString2", Value::String(None));
        item.0.insert("Bogus".to_string(), Value::Int32(0));
        assert!(schema.validate_item(&item).is_err());
    }

    #[test]
    fn fixed_size_byte_array_truncates_and_pads() {
        let dir = tempdir().unwrap();
        let schema = Schema::new(vec![Property::new(
            "Fixed",
            PropertyKind::FixedSizeByteArray(4),
        )]);
        let heap = heap(&dir);

        let too_long = Item::new().with("Fixed", Value::Bytes(vec![1, 2, 3, 4, 5]));
        let buf = encode_records(&schema, &[too_long], &heap).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);

        let too_short = Item::new().with("Fixed", Value::Bytes(vec![9, 9]));
        let buf = encode_records(&schema, &[too_short], &heap).unwrap();
        assert_eq!(buf, vec![9, 9, 0, 0]);
    }
}
