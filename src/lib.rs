//! # bucketdb: an embedded, append-only object store
//!
//! `bucketdb` persists a large, growing sequence of strongly-typed
//! items to a pair of files — one for fixed-width records, one for a
//! variable-length string heap — while providing high-throughput bulk
//! writes, cached random reads, write coalescing, and horizontal
//! partitioning by a user key.
//!
//! ## Core Features
//!
//! - **Paged Cache**: a hot-prefix-pinned LRU cache over raw file access
//! - **Fixed-Schema Buckets**: append-only object storage with a string heap
//! - **Write Coalescing**: a cooldown-driven buffer absorbing small appends
//! - **Key-Directed Partitioning**: fan-out to independent per-key buckets
//!
//! ## Example
//!
//! ```rust,ignore
//! use bucketdb::{Bucket, CacheConfig, Item, Property, PropertyKind, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Property::new("Id", PropertyKind::Int32),
//!     Property::new("Name", PropertyKind::String),
//! ]);
//! let bucket = Bucket::open("records.bin", "strings.bin", schema, CacheConfig::default())?;
//! bucket.append(&[Item::new()
//!     .with("Id", Value::Int32(1))
//!     .with("Name", Value::String(Some("hello".to_string())))])?;
//! # Ok::<(), bucketdb::StoreError>(())
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod bucket;
pub mod common;
pub mod file_access;
pub mod paged_cache;
pub mod partitioner;
pub mod schema;
pub mod static_bucket;
pub mod string_heap;
pub mod write_buffer;

pub use bucket::Bucket;
pub use common::{Result, StoreError};
pub use file_access::FileAccess;
pub use paged_cache::{CacheConfig, CacheStats, PagedCache};
pub use partitioner::{Partitioner, PartitionerConfig};
pub use schema::{Item, Property, PropertyKind, Schema, Value};
pub use static_bucket::StaticBucket;
pub use string_heap::StringHeap;
pub use write_buffer::{WriteBuffer, WriteBufferConfig};
