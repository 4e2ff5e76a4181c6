//! Page-aligned read-through, write-through LRU cache over a
//! [`FileAccess`], with hot-prefix pinning.
//!
//! Statistics are plain `AtomicU64` counters behind a snapshot-producing
//! struct, and `parking_lot::Mutex` guards the single cache lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::Result;
use crate::file_access::FileAccess;

/// Cache sizing knobs: `page_size`, `max_cached_pages`, `hot_prefix`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    pub initial_file_size: u64,
    pub growth_quantum: u64,
    pub page_size: u64,
    pub max_cached_pages: usize,
    pub hot_prefix: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let page_size = 16 * 1024 * 1024;
        Self {
            initial_file_size: page_size,
            growth_quantum: page_size,
            page_size,
            max_cached_pages: 64,
            hot_prefix: 8,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(crate::common::StoreError::InvalidConfig {
                message: "page_size must be non-zero".to_string(),
            });
        }
        if self.max_cached_pages == 0 {
            return Err(crate::common::StoreError::InvalidConfig {
                message: "max_cached_pages must be at least 1".to_string(),
            });
        }
        if self.hot_prefix > self.max_cached_pages {
            return Err(crate::common::StoreError::InvalidConfig {
                message: "hot_prefix cannot exceed max_cached_pages".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    lru_promotions: AtomicU64,
    write_throughs: AtomicU64,
}

/// A point-in-time snapshot of [`PagedCache`] counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub lru_promotions: u64,
    pub write_throughs: u64,
    pub resident_pages: usize,
}

struct CacheState {
    pages: HashMap<u64, Vec<u8>>,
    /// Least-recent at the front, most-recent at the back.
    recency: VecDeque<u64>,
}

/// Read-through/write-through LRU cache keyed by page index.
pub struct PagedCache {
    file: Arc<FileAccess>,
    page_size: u64,
    max_pages: usize,
    hot_prefix: usize,
    state: Mutex<CacheState>,
    counters: CacheCounters,
}

impl PagedCache {
    pub fn new(file: Arc<FileAccess>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            file,
            page_size: config.page_size,
            max_pages: config.max_cached_pages,
            hot_prefix: config.hot_prefix,
            state: Mutex::new(CacheState {
                pages: HashMap::new(),
                recency: VecDeque::new(),
            }),
            counters: CacheCounters::default(),
        })
    }

    pub fn file(&self) -> &FileAccess {
        &self.file
    }

    fn page_of(&self, offset: u64) -> u64 {
        offset / self.page_size
    }

    /// Returns a clone of the page's bytes, faulting it in from the
    /// underlying file on miss. Touches LRU bookkeeping per the
    /// hot-prefix rule: a hit within the tail `hot_prefix` entries does
    /// not reorder the list.
    fn get_page(&self, page_idx: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock();

        if let Some(bytes) = state.pages.get(&page_idx) {
            let bytes = bytes.clone();
            self.counters.hits.fetch_add(1, Ordering::Relaxed);

            let len = state.recency.len();
            let pos = state.recency.iter().rposition(|&p| p == page_idx);
            if let Some(pos) = pos {
                let is_hot = len - pos <= self.hot_prefix;
                if !is_hot {
                    state.recency.remove(pos);
                    state.recency.push_back(page_idx);
                    self.counters.lru_promotions.fetch_add(1, Ordering::Relaxed);
                }
            }
            return Ok(bytes);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        drop(state);

        let page_start = page_idx * self.page_size;
        let page_len = self.page_size.min(self.file.len().saturating_sub(page_start));
        let bytes = if page_len == 0 {
            Vec::new()
        } else {
            self.file.read(page_start, page_len)?
        };

        let mut state = self.state.lock();
        // Another thread may have raced us to insert this same page.
        if let Some(existing) = state.pages.get(&page_idx) {
            return Ok(existing.clone());
        }

        if state.pages.len() >= self.max_pages
            && let Some(victim) = state.recency.pop_front()
        {
            state.pages.remove(&victim);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }

        state.pages.insert(page_idx, bytes.clone());
        state.recency.push_back(page_idx);
        Ok(bytes)
    }

    /// Reads `length` bytes starting at `offset`, splitting the
    /// request across pages and concatenating the result.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(length as usize);
        let mut remaining_offset = offset;
        let mut remaining_len = length;

        while remaining_len > 0 {
            let page_idx = self.page_of(remaining_offset);
            let page_start = page_idx * self.page_size;
            let in_page_offset = (remaining_offset - page_start) as usize;
            let page = self.get_page(page_idx)?;

            if in_page_offset >= page.len() {
                return Err(crate::common::StoreError::OutOfRange {
                    index: remaining_offset,
                    count: self.file.len(),
                });
            }

            let take = remaining_len.min((page.len() - in_page_offset) as u64) as usize;
            out.extend_from_slice(&page[in_page_offset..in_page_offset + take]);

            remaining_offset += take as u64;
            remaining_len -= take as u64;
        }

        Ok(out)
    }

    /// Writes the raw bytes through to the underlying file, then
    /// patches any resident pages overlapping the write. Non-resident
    /// pages are never faulted in by a write.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.file.write(offset, bytes)?;
        self.counters.write_throughs.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let start_page = self.page_of(offset);
        let end_page = self.page_of(offset + bytes.len() as u64 - 1);
        let file_len = self.file.len();
        let write_end = offset + bytes.len() as u64;

        for page_idx in start_page..=end_page {
            let Some(page) = state.pages.get_mut(&page_idx) else {
                continue;
            };
            let page_start = page_idx * self.page_size;

            // The write (or the file growth it triggered) may have
            // extended past what was resident; `FileAccess` zero-fills
            // on growth, so the new tail is legitimately zero until
            // overwritten below.
            let resident_end = self.page_size.min(file_len.saturating_sub(page_start));
            if resident_end > page.len() as u64 {
                page.resize(resident_end as usize, 0);
            }
            let page_end = page_start + page.len() as u64;

            let overlap_start = offset.max(page_start);
            let overlap_end = write_end.min(page_end);
            if overlap_start >= overlap_end {
                continue;
            }

            let dst_start = (overlap_start - page_start) as usize;
            let src_start = (overlap_start - offset) as usize;
            let len = (overlap_end - overlap_start) as usize;
            page[dst_start..dst_start + len]
                .copy_from_slice(&bytes[src_start..src_start + len]);
        }

        Ok(())
    }

    pub fn delete(self) -> Result<()> {
        match Arc::try_unwrap(self.file) {
            Ok(file) => file.delete(),
            Err(arc) => {
                log::warn!(
                    "PagedCache::delete called while {:?} is still shared; file left in place",
                    arc.path()
                );
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            lru_promotions: self.counters.lru_promotions.load(Ordering::Relaxed),
            write_throughs: self.counters.write_throughs.load(Ordering::Relaxed),
            resident_pages: state.pages.len(),
        }
    }

    pub fn statistics(&self) -> String {
        let s = self.stats();
        format!(
            "PagedCache:\n  resident_pages: {}\n  hits: {}\n  misses: {}\n  evictions: {}\n  lru_promotions: {}\n  write_throughs: {}\n",
            s.resident_pages, s.hits, s.misses, s.evictions, s.lru_promotions, s.write_throughs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache(dir: &tempfile::TempDir, page_size: u64, max_pages: usize, hot_prefix: usize) -> PagedCache {
        let fa = Arc::new(
            FileAccess::open(
                dir.path().join("f.bin"),
                page_size * (max_pages as u64 + 4),
                page_size,
            )
            .unwrap(),
        );
        PagedCache::new(
            fa,
            CacheConfig {
                initial_file_size: page_size,
                growth_quantum: page_size,
                page_size,
                max_cached_pages: max_pages,
                hot_prefix,
            },
        )
        .unwrap()
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 64, 4, 1);
        cache.write(10, b"hello world").unwrap();
        assert_eq!(cache.read(10, 11).unwrap(), b"hello world");
    }

    #[test]
    fn read_spans_multiple_pages() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 16, 8, 1);
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        cache.write(0, &data).unwrap();
        assert_eq!(cache.read(0, 64).unwrap(), data);
        assert_eq!(cache.read(8, 16).unwrap(), data[8..24]);
    }

    #[test]
    fn write_patches_resident_page_without_fault() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 16, 4, 1);
        // Fault the page in.
        cache.read(0, 16).unwrap();
        let misses_before = cache.stats().misses;

        cache.write(4, b"XXXX").unwrap();
        let read_back = cache.read(0, 16).unwrap();
        assert_eq!(&read_back[4..8], b"XXXX");
        // Patch should not have faulted the page in again.
        assert_eq!(cache.stats().misses, misses_before);
    }

    #[test]
    fn eviction_respects_residency_bound() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 16, 4, 0);
        for page in 0..10u64 {
            cache.read(page * 16, 1).unwrap();
        }
        let stats = cache.stats();
        assert!(stats.resident_pages <= 4);
        assert_eq!(stats.misses, 10);
        assert_eq!(stats.evictions, 6);
    }

    #[test]
    fn hot_prefix_hit_does_not_reorder() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 16, 4, 4);
        for page in 0..4u64 {
            cache.read(page * 16, 1).unwrap();
        }
        // All 4 pages are within the hot prefix; hits on any of them
        // must not promote (reorder) the list or count as promotions.
        for page in 0..4u64 {
            cache.read(page * 16, 1).unwrap();
        }
        assert_eq!(cache.stats().lru_promotions, 0);
    }

    #[test]
    fn hit_outside_hot_prefix_promotes() {
        let dir = tempdir().unwrap();
        let cache = cache(&dir, 16, 8, 1);
        for page in 0..5u64 {
            cache.read(page * 16, 1).unwrap();
        }
        // page 0 sits outside the hot (tail-1) window; hitting it again
        // should promote it.
        cache.read(0, 1).unwrap();
        assert_eq!(cache.stats().lru_promotions, 1);
    }
}
