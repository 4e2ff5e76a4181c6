//! Typed convenience wrapper over [`Bucket`].
//!
//! The dynamic `Item` map is the primitive; this layers a fixed Rust
//! type `T` on top via two user-supplied closures, with no runtime
//! reflection.

use std::path::Path;

use crate::bucket::Bucket;
use crate::common::Result;
use crate::paged_cache::CacheConfig;
use crate::schema::{Item, Schema};

/// Wraps a [`Bucket`] with `T <-> Item` conversion closures so callers
/// with a fixed struct never write the map conversion by hand.
pub struct StaticBucket<T> {
    bucket: Bucket,
    to_item: Box<dyn Fn(&T) -> Item + Send + Sync>,
    from_item: Box<dyn Fn(Item) -> Result<T> + Send + Sync>,
}

impl<T> StaticBucket<T> {
    pub fn open(
        schema: Schema,
        record_path: impl AsRef<Path>,
        string_path: impl AsRef<Path>,
        cache_config: CacheConfig,
        to_item: impl Fn(&T) -> Item + Send + Sync + 'static,
        from_item: impl Fn(Item) -> Result<T> + Send + Sync + 'static,
    ) -> Result<Self> {
        Ok(Self {
            bucket: Bucket::open(schema, record_path, string_path, cache_config)?,
            to_item: Box::new(to_item),
            from_item: Box::new(from_item),
        })
    }

    pub fn schema(&self) -> &Schema {
        self.bucket.schema()
    }

    pub fn count(&self) -> u64 {
        self.bucket.count()
    }

    pub fn append(&self, values: &[T]) -> Result<()> {
        let items: Vec<Item> = values.iter().map(|v| (self.to_item)(v)).collect();
        self.bucket.append(&items)
    }

    pub fn read(&self, index: u64) -> Result<T> {
        let item = self.bucket.read(index)?;
        (self.from_item)(item)
    }

    pub fn read_bulk(&self, from: u64, take: u64) -> Result<Vec<T>> {
        self.bucket
            .read_bulk(from, take)?
            .into_iter()
            .map(|item| (self.from_item)(item))
            .collect()
    }

    pub fn sync(&self) -> Result<()> {
        self.bucket.sync()
    }

    pub fn delete(self) -> Result<()> {
        self.bucket.delete()
    }

    pub fn statistics(&self) -> String {
        self.bucket.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Property, PropertyKind, Value};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
        label: String,
    }

    fn point_schema() -> Schema {
        Schema::new(vec![
            Property::new("X", PropertyKind::Int32),
            Property::new("Y", PropertyKind::Int32),
            Property::new("Label", PropertyKind::String),
        ])
    }

    fn point_bucket(dir: &tempfile::TempDir) -> StaticBucket<Point> {
        StaticBucket::open(
            point_schema(),
            dir.path().join("records.bin"),
            dir.path().join("strings.bin"),
            CacheConfig::default(),
            |p: &Point| {
                Item::new()
                    .with("X", Value::Int32(p.x))
                    .with("Y", Value::Int32(p.y))
                    .with("Label", Value::String(Some(p.label.clone())))
            },
            |item: Item| {
                let x = match item.get("X") {
                    Some(Value::Int32(v)) => *v,
                    _ => {
                        return Err(crate::common::StoreError::DecodeError {
                            message: "missing X".to_string(),
                        });
                    }
                };
                let y = match item.get("Y") {
                    Some(Value::Int32(v)) => *v,
                    _ => {
                        return Err(crate::common::StoreError::DecodeError {
                            message: "missing Y".to_string(),
                        });
                    }
                };
                let label = match item.get("Label") {
                    Some(Value::String(Some(s))) => s.clone(),
                    _ => String::new(),
                };
                Ok(Point { x, y, label })
            },
        )
        .unwrap()
    }

    #[test]
    fn append_then_read_round_trips_typed_values() {
        let dir = tempdir().unwrap();
        let bucket = point_bucket(&dir);
        let points = vec![
            Point { x: 1, y: 2, label: "a".to_string() },
            Point { x: 3, y: 4, label: "b".to_string() },
        ];
        bucket.append(&points).unwrap();

        assert_eq!(bucket.count(), 2);
        assert_eq!(bucket.read(0).unwrap(), points[0]);
        assert_eq!(bucket.read_bulk(0, 2).unwrap(), points);
    }
}
