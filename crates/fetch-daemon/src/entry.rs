//! Cache entries and read leases
//!
//! Each resident entry owns its open local file behind an `Arc<RwLock<File>>`.
//! Readers get a [`CachedFile`], which holds one shared guard for as long as
//! it lives; the store evicts only after `try_write_arc` succeeds, so a file
//! with an outstanding lease is never deleted. Positional reads give every
//! lease its own cursor over the shared file descriptor.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use fetch_core::{EntryInfo, FileStat, Priority};

/// Fixed-point scale of the value-density term
pub const DENSITY_SHIFT: u32 = 32;

/// Value density: accesses per byte, in fixed point
pub fn density(frequency: u64, size: u64) -> Priority {
    let scaled = (frequency as u128) << DENSITY_SHIFT;
    let density = scaled / size.max(1) as u128;
    density.min(Priority::MAX as u128) as Priority
}

/// `clock + frequency / size`, never below `clock`
pub fn priority(clock: Priority, frequency: u64, size: u64) -> Priority {
    clock.saturating_add(density(frequency, size))
}

/// A resident cached file plus its eviction metadata
#[derive(Debug)]
pub struct Entry {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
    pub(crate) frequency: u64,
    pub(crate) priority: Priority,
    pub(crate) heap_index: Option<usize>,
    pub(crate) modified: SystemTime,
    file: Arc<RwLock<File>>,
}

impl Entry {
    /// New entry with one recorded access
    pub(crate) fn new(
        name: String,
        path: PathBuf,
        size: u64,
        clock: Priority,
        file: File,
        modified: SystemTime,
    ) -> Self {
        Self {
            name,
            path,
            size,
            frequency: 1,
            priority: priority(clock, 1, size),
            heap_index: None,
            modified,
            file: Arc::new(RwLock::new(file)),
        }
    }

    /// Record a hit and recompute the priority against the current clock
    pub(crate) fn touch(&mut self, clock: Priority) {
        self.frequency = self.frequency.saturating_add(1);
        self.priority = priority(clock, self.frequency, self.size);
    }

    /// Take a shared lease, fails only while the store holds the file exclusively
    pub(crate) fn lease(&self) -> Option<CachedFile> {
        let guard = self.file.try_read_arc()?;
        Some(CachedFile {
            name: self.name.clone(),
            size: self.size,
            modified: self.modified,
            position: 0,
            guard,
        })
    }

    /// Non-blocking exclusive lock used by eviction
    pub(crate) fn try_exclusive(&self) -> Option<ArcRwLockWriteGuard<RawRwLock, File>> {
        self.file.try_write_arc()
    }

    pub(crate) fn info(&self) -> EntryInfo {
        EntryInfo {
            name: self.name.clone(),
            size: self.size,
            frequency: self.frequency,
            priority: self.priority,
        }
    }
}

/// A shared read lease on a cached file
///
/// Dropping the handle (or calling [`CachedFile::close`]) releases the lease.
pub struct CachedFile {
    name: String,
    size: u64,
    modified: SystemTime,
    position: u64,
    guard: ArcRwLockReadGuard<RawRwLock, File>,
}

impl CachedFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn stat(&self) -> FileStat {
        FileStat {
            name: self.name.clone(),
            size: self.size,
            modified: self.modified,
        }
    }

    /// Read at an absolute offset without moving the cursor
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let remaining = (self.size - offset).min(buf.len() as u64) as usize;
        read_at(&self.guard, &mut buf[..remaining], offset)
    }

    /// Release the lease
    pub fn close(self) {}
}

impl std::fmt::Debug for CachedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("position", &self.position)
            .finish()
    }
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn entry_with(data: &[u8]) -> (TempDir, Entry) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("item");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(data).unwrap();
        let entry = Entry::new(
            "item".into(),
            path,
            data.len() as u64,
            0,
            file,
            SystemTime::now(),
        );
        (temp_dir, entry)
    }

    #[test]
    fn test_density_scales_with_frequency_and_size() {
        assert_eq!(density(1, 1), 1 << DENSITY_SHIFT);
        assert!(density(2, 100) > density(1, 100));
        assert!(density(1, 100) > density(1, 1000));
        // Small ratios do not floor to zero
        assert!(density(1, 1 << 20) > 0);
    }

    #[test]
    fn test_density_zero_size_and_saturation() {
        assert_eq!(density(1, 0), density(1, 1));
        assert_eq!(density(u64::MAX, 1), Priority::MAX);
    }

    #[test]
    fn test_priority_never_below_clock() {
        assert!(priority(500, 1, u64::MAX) >= 500);
        assert_eq!(priority(500, 1, 60), 500 + density(1, 60));
        assert_eq!(priority(Priority::MAX - 1, 5, 1), Priority::MAX);
    }

    #[test]
    fn test_touch_recomputes_priority() {
        let (_dir, mut entry) = entry_with(b"0123456789");
        assert_eq!(entry.frequency, 1);
        assert_eq!(entry.priority, priority(0, 1, 10));

        entry.touch(1000);
        assert_eq!(entry.frequency, 2);
        assert_eq!(entry.priority, priority(1000, 2, 10));
    }

    #[test]
    fn test_lease_read_and_seek() {
        let (_dir, entry) = entry_with(b"hello cached world");
        let mut file = entry.lease().unwrap();

        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello cached world");

        file.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = [0u8; 6];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"cached");

        assert_eq!(file.seek(SeekFrom::End(-5)).unwrap(), 13);
        assert_eq!(file.seek(SeekFrom::Current(-13)).unwrap(), 0);
        assert!(file.seek(SeekFrom::Current(-1)).is_err());

        // Reading past the end yields EOF
        file.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_leases_have_independent_cursors() {
        let (_dir, entry) = entry_with(b"abcdef");
        let mut first = entry.lease().unwrap();
        let mut second = entry.lease().unwrap();

        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn test_stat() {
        let (_dir, entry) = entry_with(b"12345");
        let file = entry.lease().unwrap();
        let stat = file.stat();
        assert_eq!(stat.name, "item");
        assert_eq!(stat.size, 5);
        assert_eq!(stat.modified, entry.modified);
        assert_eq!(file.len(), 5);
        assert!(!file.is_empty());
    }

    #[test]
    fn test_exclusive_blocked_by_lease() {
        let (_dir, entry) = entry_with(b"data");

        let first = entry.lease().unwrap();
        let second = entry.lease().unwrap();
        assert!(entry.try_exclusive().is_none());

        first.close();
        assert!(entry.try_exclusive().is_none());

        drop(second);
        let exclusive = entry.try_exclusive();
        assert!(exclusive.is_some());

        // No lease while held exclusively
        assert!(entry.lease().is_none());
        drop(exclusive);
        assert!(entry.lease().is_some());
    }

    #[test]
    fn test_lease_is_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<CachedFile>();
    }
}
