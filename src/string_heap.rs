//! Append-only UTF-8 blob heap.
//!
//! The tail pointer is advanced once under a lock (O(1) regardless of
//! payload size), and the actual byte copy happens outside that lock
//! so concurrent allocators don't serialize on I/O.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::Result;
use crate::file_access::FileAccess;
use crate::paged_cache::{CacheConfig, PagedCache};

const HEADER_LEN: u64 = 8;

/// Sentinel offset meaning "empty string" (not heap-backed).
pub const EMPTY_SENTINEL: i64 = -1;
/// Sentinel offset meaning "null string" (not heap-backed).
pub const NULL_SENTINEL: i64 = -2;

/// A saved string payload: its offset in the heap and byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedString {
    pub offset: i64,
    pub length: u32,
}

/// Append-only string/blob heap backed by one [`PagedCache`].
pub struct StringHeap {
    cache: PagedCache,
    next_free: AtomicU64,
    alloc_lock: Mutex<()>,
}

impl StringHeap {
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let fa = Arc::new(FileAccess::open(
            &path,
            config.initial_file_size.max(config.growth_quantum),
            config.growth_quantum,
        )?);
        let cache = PagedCache::new(fa, config)?;

        let next_free = if cache.file().len() >= HEADER_LEN {
            let header = cache.read(0, HEADER_LEN)?;
            let raw = u64::from_le_bytes(header.try_into().unwrap());
            raw.max(HEADER_LEN)
        } else {
            HEADER_LEN
        };

        if cache.file().len() < HEADER_LEN {
            cache.write(0, &next_free.to_le_bytes())?;
        }

        log::debug!("StringHeap opened at {:?}, next_free={next_free}", path.as_ref());

        Ok(Self {
            cache,
            next_free: AtomicU64::new(next_free),
            alloc_lock: Mutex::new(()),
        })
    }

    /// Reserves space for every payload, writes the new header once,
    /// then writes every payload's bytes outside the allocation lock.
    /// Returns saved `(offset, length)` pairs in input order.
    pub fn append_many(&self, payloads: &[Vec<u8>]) -> Result<Vec<SavedString>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let total: u64 = payloads.iter().map(|p| p.len() as u64).sum();

        let base = {
            let _guard = self.alloc_lock.lock();
            let base = self.next_free.load(Ordering::Acquire);
            let new_free = base + total;
            self.cache.write(0, &new_free.to_le_bytes())?;
            self.next_free.store(new_free, Ordering::Release);
            base
        };

        let mut saved = Vec::with_capacity(payloads.len());
        let mut cursor = base;
        for payload in payloads {
            let offset = cursor;
            if !payload.is_empty() {
                self.cache.write(offset, payload)?;
            }
            saved.push(SavedString {
                offset: offset as i64,
                length: payload.len() as u32,
            });
            cursor += payload.len() as u64;
        }

        Ok(saved)
    }

    /// Loads a string given its sentinel-or-offset and length.
    /// Returns `None` for the null sentinel.
    pub fn load(&self, offset: i64, length: u32) -> Result<Option<String>> {
        if offset == NULL_SENTINEL {
            return Ok(None);
        }
        if offset == EMPTY_SENTINEL || length == 0 {
            return Ok(Some(String::new()));
        }

        let bytes = self.cache.read(offset as u64, length as u64)?;
        let s = String::from_utf8(bytes).map_err(|e| crate::common::StoreError::DecodeError {
            message: format!("invalid utf-8 in string heap at offset {offset}: {e}"),
        })?;
        Ok(Some(s))
    }

    pub fn next_free_offset(&self) -> u64 {
        self.next_free.load(Ordering::Acquire)
    }

    pub fn delete(self) -> Result<()> {
        self.cache.delete()
    }

    pub fn statistics(&self) -> String {
        format!(
            "StringHeap:\n  next_free: {}\n{}",
            self.next_free_offset(),
            self.cache.statistics()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn heap(dir: &tempfile::TempDir) -> StringHeap {
        StringHeap::open(dir.path().join("strings.bin"), CacheConfig::default()).unwrap()
    }

    #[test]
    fn fresh_heap_starts_at_header_len() {
        let dir = tempdir().unwrap();
        let heap = heap(&dir);
        assert_eq!(heap.next_free_offset(), HEADER_LEN);
    }

    #[test]
    fn append_many_round_trips() {
        let dir = tempdir().unwrap();
        let heap = heap(&dir);
        let payloads = vec![b"hello".to_vec(), b"world!!".to_vec()];
        let saved = heap.append_many(&payloads).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(
            heap.load(saved[0].offset, saved[0].length).unwrap(),
            Some("hello".to_string())
        );
        assert_eq!(
            heap.load(saved[1].offset, saved[1].length).unwrap(),
            Some("world!!".to_string())
        );
    }

    #[test]
    fn sentinels_decode_without_touching_heap() {
        let dir = tempdir().unwrap();
        let heap = heap(&dir);
        assert_eq!(heap.load(NULL_SENTINEL, 0).unwrap(), None);
        assert_eq!(heap.load(EMPTY_SENTINEL, 0).unwrap(), Some(String::new()));
    }

    #[test]
    fn reopen_preserves_next_free() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strings.bin");
        let saved = {
            let heap = StringHeap::open(&path, CacheConfig::default()).unwrap();
            heap.append_many(&[b"persisted".to_vec()]).unwrap()
        };
        let heap = StringHeap::open(&path, CacheConfig::default()).unwrap();
        assert_eq!(heap.next_free_offset(), HEADER_LEN + 9);
        assert_eq!(
            heap.load(saved[0].offset, saved[0].length).unwrap(),
            Some("persisted".to_string())
        );
    }

    #[test]
    fn concurrent_append_many_has_no_overlaps() {
        let dir = tempdir().unwrap();
        let heap = Arc::new(heap(&dir));
        let mut handles = Vec::new();

        for t in 0..50 {
            let heap = heap.clone();
            handles.push(thread::spawn(move || {
                let payloads: Vec<Vec<u8>> = (0..20)
                    .map(|i| format!("thread-{t}-string-{i}").into_bytes())
                    .collect();
                let saved = heap.append_many(&payloads).unwrap();
                (payloads, saved)
            }));
        }

        let mut ranges = Vec::new();
        for handle in handles {
            let (payloads, saved) = handle.join().unwrap();
            for (payload, s) in payloads.iter().zip(saved.iter()) {
                let decoded = heap.load(s.offset, s.length).unwrap().unwrap();
                assert_eq!(decoded.into_bytes(), *payload);
                ranges.push((s.offset, s.offset + s.length as i64));
            }
        }

        ranges.sort();
        for window in ranges.windows(2) {
            assert!(window[0].1 <= window[1].0, "overlapping string ranges");
        }
    }
}
