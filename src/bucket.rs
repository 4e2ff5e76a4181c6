//! Fixed-record-width object store: bulk append, cached random read,
//! strings redirected to a companion [`StringHeap`].
//!
//! Thin orchestration over the lower layers behind a small public
//! surface (`open`, `append`, `read`, `statistics`); per-field
//! serialization lives in `schema.rs`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{Result, StoreError};
use crate::file_access::FileAccess;
use crate::paged_cache::{CacheConfig, PagedCache};
use crate::schema::{Item, Schema, decode_records, encode_records};
use crate::string_heap::StringHeap;

const HEADER_LEN: u64 = 8;

/// Fixed-schema, append-only object store over one record file and
/// one string file.
pub struct Bucket {
    schema: Schema,
    width: u64,
    records: PagedCache,
    strings: StringHeap,
    count: AtomicU64,
    append_lock: Mutex<()>,
}

impl Bucket {
    /// Opens (creating if absent) a bucket at `record_path`/`string_path`
    /// for the given schema.
    pub fn open(
        schema: Schema,
        record_path: impl AsRef<Path>,
        string_path: impl AsRef<Path>,
        cache_config: CacheConfig,
    ) -> Result<Self> {
        let width = schema.record_width() as u64;
        if width == 0 {
            return Err(StoreError::InvalidConfig {
                message: "schema must declare at least one property".to_string(),
            });
        }

        let record_fa = Arc::new(FileAccess::open(
            &record_path,
            cache_config.initial_file_size.max(HEADER_LEN),
            cache_config.growth_quantum,
        )?);
        let records = PagedCache::new(record_fa, cache_config)?;
        let strings = StringHeap::open(&string_path, cache_config)?;

        let count = if records.file().len() >= HEADER_LEN {
            let header = records.read(0, HEADER_LEN)?;
            u64::from_le_bytes(header.try_into().unwrap())
        } else {
            0
        };

        if records.file().len() < HEADER_LEN {
            records.write(0, &count.to_le_bytes())?;
        }

        log::info!(
            "Bucket opened at {:?} (count={count}, width={width})",
            record_path.as_ref()
        );

        Ok(Self {
            schema,
            width,
            records,
            strings,
            count: AtomicU64::new(count),
            append_lock: Mutex::new(()),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The persisted item count, visible to readers only once the
    /// count header has been advanced past appended indices.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Bulk-appends `items`, visible to readers only after this
    /// returns. Reserves indices under the append lock, then writes
    /// bytes and advances the count header outside it.
    pub fn append(&self, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let buffer = encode_records(&self.schema, items, &self.strings)?;

        let base = {
            let _guard = self.append_lock.lock();
            let base = self.count();
            let new_count = base + items.len() as u64;

            let record_offset = HEADER_LEN + base * self.width;
            self.records.write(record_offset, &buffer)?;
            self.records.write(0, &new_count.to_le_bytes())?;
            self.count.store(new_count, Ordering::Release);
            base
        };

        log::debug!("Bucket appended {} items at base {base}", items.len());
        Ok(())
    }

    /// Reads the single item at `index`.
    pub fn read(&self, index: u64) -> Result<Item> {
        let items = self.read_bulk(index, 1)?;
        items
            .into_iter()
            .next()
            .ok_or(StoreError::OutOfRange { index, count: self.count() })
    }

    /// Reads `take` items starting at `from` with a single ranged
    /// paged-cache read. Any overrun of `count` is `OutOfRange`.
    pub fn read_bulk(&self, from: u64, take: u64) -> Result<Vec<Item>> {
        let count = self.count();
        if take == 0 {
            if from > count {
                return Err(StoreError::RangeOutOfRange { from, take, count });
            }
            return Ok(Vec::new());
        }
        let end = from
            .checked_add(take)
            .ok_or(StoreError::RangeOutOfRange { from, take, count })?;
        if end > count {
            return Err(StoreError::RangeOutOfRange { from, take, count });
        }

        let byte_range_start = HEADER_LEN + from * self.width;
        let byte_range_len = take * self.width;
        let bytes = self.records.read(byte_range_start, byte_range_len)?;
        decode_records(&self.schema, &bytes, &self.strings)
    }

    /// No-op: the bucket writes synchronously, present for API
    /// symmetry with [`crate::write_buffer::WriteBuffer`].
    pub fn sync(&self) -> Result<()> {
        Ok(())
    }

    pub fn delete(self) -> Result<()> {
        self.records.delete()?;
        self.strings.delete()?;
        Ok(())
    }

    pub fn statistics(&self) -> String {
        format!(
            "Bucket:\n  count: {}\n  record_width: {}\n{}{}",
            self.count(),
            self.width,
            self.records.statistics(),
            self.strings.statistics()
        )
    }
}
