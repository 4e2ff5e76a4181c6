//! Single-file byte store that grows in coarse chunks.
//!
//! Seek-based read/write over `std::fs::File`, parent-directory
//! creation on open, and growth-to-next-quantum on out-of-range writes
//! via `std::fs::File::set_len`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::{Result, StoreError};

/// Owns one backing file, creating it at `initial_size` if absent and
/// growing it to the next multiple of `growth_quantum` whenever a
/// write would otherwise overrun it.
pub struct FileAccess {
    path: PathBuf,
    file: Mutex<File>,
    growth_quantum: u64,
    len: std::sync::atomic::AtomicU64,
}

impl FileAccess {
    /// Opens (creating if absent) the file at `path`, sizing it to
    /// `initial_size` bytes on first creation.
    pub fn open(path: impl AsRef<Path>, initial_size: u64, growth_quantum: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = if existed {
            file.metadata()?.len()
        } else {
            file.set_len(initial_size)?;
            initial_size
        };

        log::debug!(
            "FileAccess opened {:?} (existed={existed}, len={len})",
            path
        );

        Ok(Self {
            path,
            file: Mutex::new(file),
            growth_quantum: growth_quantum.max(1),
            len: std::sync::atomic::AtomicU64::new(len),
        })
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `length` bytes starting at `offset`. Fails if the
    /// range runs past the current file end.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| StoreError::DecodeError {
                message: "read range overflow".to_string(),
            })?;
        if end > self.len() {
            return Err(StoreError::OutOfRange {
                index: end,
                count: self.len(),
            });
        }

        let mut buf = vec![0u8; length as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes `bytes` at `offset`, growing the file to the next
    /// multiple of the growth quantum first if needed.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let required = offset
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| StoreError::DecodeError {
                message: "write range overflow".to_string(),
            })?;

        let mut file = self.file.lock();
        let current_len = self.len();
        if required > current_len {
            let quanta = required.div_ceil(self.growth_quantum);
            let new_len = quanta * self.growth_quantum;
            file.set_len(new_len)?;
            self.len.store(new_len, std::sync::atomic::Ordering::Release);
            log::debug!("FileAccess {:?} grown to {new_len} bytes", self.path);
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Closes and removes the underlying file.
    pub fn delete(self) -> Result<()> {
        drop(self.file);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_file_at_initial_size() {
        let dir = tempdir().unwrap();
        let fa = FileAccess::open(dir.path().join("f.bin"), 4096, 4096).unwrap();
        assert_eq!(fa.len(), 4096);
    }

    #[test]
    fn reopens_existing_file_without_resizing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        {
            let fa = FileAccess::open(&path, 4096, 4096).unwrap();
            fa.write(4090, &[1, 2, 3]).unwrap();
        }
        let fa = FileAccess::open(&path, 4096, 4096).unwrap();
        assert_eq!(fa.len(), 4096);
        assert_eq!(fa.read(4090, 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn write_grows_to_next_quantum() {
        let dir = tempdir().unwrap();
        let fa = FileAccess::open(dir.path().join("f.bin"), 16, 16).unwrap();
        fa.write(20, b"hello").unwrap();
        assert_eq!(fa.len(), 32);
        assert_eq!(fa.read(20, 5).unwrap(), b"hello");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let fa = FileAccess::open(dir.path().join("f.bin"), 16, 16).unwrap();
        assert!(fa.read(10, 100).is_err());
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let fa = FileAccess::open(&path, 16, 16).unwrap();
        fa.delete().unwrap();
        assert!(!path.exists());
    }
}
