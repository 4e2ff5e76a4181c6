//! Key-directed fan-out to a family of per-partition `WriteBuffer` +
//! `Bucket` pairs.
//!
//! A `DashMap`-backed concurrent map gives lock-free reads once an
//! entry is registered; a `parking_lot::Mutex` creation guard is held
//! only around the miss-then-insert path.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::bucket::Bucket;
use crate::common::{Result, StoreError};
use crate::paged_cache::CacheConfig;
use crate::schema::{Item, Schema, partition_key_string};
use crate::write_buffer::{WriteBuffer, WriteBufferConfig};

/// Bundles the two config structs a `Partitioner` hands each child,
/// plus the property name that carries the partition key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartitionerConfig {
    pub partition_key_property: String,
    pub cache: CacheConfig,
    pub write_buffer: WriteBufferConfig,
    pub as_enumerable_page_size: u64,
}

impl PartitionerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.partition_key_property.is_empty() {
            return Err(StoreError::InvalidConfig {
                message: "partition_key_property must be non-empty".to_string(),
            });
        }
        if self.as_enumerable_page_size == 0 {
            return Err(StoreError::InvalidConfig {
                message: "as_enumerable_page_size must be non-zero".to_string(),
            });
        }
        self.cache.validate()?;
        self.write_buffer.validate()
    }
}

/// Owns a base directory and a `DashMap` of partition key -> child
/// `WriteBuffer`+`Bucket` pair.
pub struct Partitioner {
    name: String,
    base_dir: PathBuf,
    schema: Schema,
    config: PartitionerConfig,
    children: DashMap<String, Arc<WriteBuffer>>,
    creation_guard: Mutex<()>,
}

impl Partitioner {
    /// Opens (creating if absent) a partitioner rooted at `directory`,
    /// discovering and reopening any existing partition subdirectories.
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        schema: Schema,
        config: PartitionerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let base_dir = directory.into();
        std::fs::create_dir_all(&base_dir)?;

        let partitioner = Self {
            name: name.into(),
            base_dir,
            schema,
            config,
            children: DashMap::new(),
            creation_guard: Mutex::new(()),
        };

        for entry in std::fs::read_dir(&partitioner.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            partitioner.open_child(&key)?;
        }

        log::info!(
            "Partitioner `{}` opened at {:?} ({} partitions)",
            partitioner.name,
            partitioner.base_dir,
            partitioner.children.len()
        );

        Ok(partitioner)
    }

    fn child_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.base_dir.join(key);
        (dir.join("records.bin"), dir.join("strings.bin"))
    }

    fn open_child(&self, key: &str) -> Result<Arc<WriteBuffer>> {
        let (record_path, string_path) = self.child_paths(key);
        let bucket = Bucket::open(
            self.schema.clone(),
            record_path,
            string_path,
            self.config.cache,
        )?;
        let buffer = Arc::new(WriteBuffer::new(bucket, self.config.write_buffer)?);
        self.children.insert(key.to_string(), buffer.clone());
        Ok(buffer)
    }

    /// Looks up or lazily creates the child for `key`, under the
    /// partition-creation mutex on the miss path only.
    fn child_for(&self, key: &str) -> Result<Arc<WriteBuffer>> {
        if let Some(child) = self.children.get(key) {
            return Ok(child.clone());
        }
        let _guard = self.creation_guard.lock();
        if let Some(child) = self.children.get(key) {
            return Ok(child.clone());
        }
        log::debug!("Partitioner `{}` creating partition `{key}`", self.name);
        self.open_child(key)
    }

    fn key_of(&self, item: &Item) -> Result<String> {
        let value = item
            .get(&self.config.partition_key_property)
            .ok_or_else(|| StoreError::MissingProperty {
                property: self.config.partition_key_property.clone(),
            })?;
        partition_key_string(value)
    }

    /// Extracts each item's partition key, groups items by child, and
    /// appends each group to its `WriteBuffer`.
    pub async fn append(&self, items: Vec<Item>) -> Result<()> {
        let mut grouped: Vec<(Arc<WriteBuffer>, Vec<Item>)> = Vec::new();
        for item in items {
            let key = self.key_of(&item)?;
            let child = self.child_for(&key)?;
            match grouped.iter_mut().find(|(c, _)| Arc::ptr_eq(c, &child)) {
                Some((_, batch)) => batch.push(item),
                None => grouped.push((child, vec![item])),
            }
        }
        for (child, batch) in grouped {
            child.append(batch).await?;
        }
        Ok(())
    }

    pub fn partitions_count(&self) -> usize {
        self.children.len()
    }

    /// Reads `take` items starting at `from` from the partition keyed
    /// by `key`.
    pub async fn read_bulk(&self, key: &str, from: u64, take: u64) -> Result<Vec<Item>> {
        let child = self
            .children
            .get(key)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::UnknownProperty {
                property: key.to_string(),
            })?;
        child.read_bulk(from, take).await
    }

    /// Concatenates every child's full contents, in the partitioner's
    /// iteration order over its children map.
    pub async fn read_all(&self) -> Result<Vec<Item>> {
        let keys: Vec<String> = self.children.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::new();
        for key in keys {
            let child = self.children.get(&key).unwrap().clone();
            let count = child.count().await;
            out.extend(child.read_bulk(0, count).await?);
        }
        Ok(out)
    }

    /// Awaits every child's `WriteBuffer`.
    pub async fn sync(&self) -> Result<()> {
        let children: Vec<Arc<WriteBuffer>> =
            self.children.iter().map(|e| e.value().clone()).collect();
        for child in children {
            child.sync().await?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> String {
        let mut out = format!(
            "Partitioner `{}`:\n  partitions: {}\n",
            self.name,
            self.partitions_count()
        );
        for entry in self.children.iter() {
            out.push_str(&format!("  partition `{}`:\n", entry.key()));
            for line in entry.value().statistics().lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}
