//! Bounds-checked file reader
//!
//! Reads byte ranges of an immutable data file, either through a memory map
//! or through positioned reads on the open handle. The mode is
//! chosen when the file is opened, from the storage configuration's
//! `enable_mmap_read` switch.
//!
//! ```no_run
//! use kuba_exec::storage::DiskFileReader;
//!
//! # fn example() -> Result<(), kuba_exec::error::StorageError> {
//! let reader = DiskFileReader::open("/data/000001.tsf", true)?;
//! let header = reader.read_at(0, 64)?;
//! assert_eq!(header.len(), 64);
//! reader.close();
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::error::StorageError;

enum Backing {
    Mapped(Mmap),
    Handle(Mutex<File>),
    /// Zero-length file: nothing to map, every non-empty read is out of bounds
    Empty,
}

struct Inner {
    path: PathBuf,
    backing: Option<Backing>,
}

/// Reader over one immutable file
pub struct DiskFileReader {
    inner: RwLock<Inner>,
    size: u64,
    mmapped: bool,
}

impl DiskFileReader {
    /// Open `path`, mapping it when `enable_mmap` is set
    pub fn open(path: impl AsRef<Path>, enable_mmap: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        let backing = if size == 0 {
            Backing::Empty
        } else if enable_mmap {
            // SAFETY: data files are immutable once written; nothing truncates
            // or rewrites them while a reader is open.
            let map = unsafe { Mmap::map(&file)? };
            Backing::Mapped(map)
        } else {
            Backing::Handle(Mutex::new(file))
        };
        let mmapped = matches!(backing, Backing::Mapped(_));

        tracing::debug!(path = %path.display(), size, mmap = mmapped, "File opened");
        Ok(Self {
            inner: RwLock::new(Inner {
                path,
                backing: Some(backing),
            }),
            size,
            mmapped,
        })
    }

    /// Read `len` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>, StorageError> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(StorageError::OutOfBounds {
                offset,
                len,
                size: self.size,
            });
        }

        let inner = self.inner.read();
        let backing = inner
            .backing
            .as_ref()
            .ok_or_else(|| StorageError::FileClosed(inner.path.display().to_string()))?;
        match backing {
            Backing::Mapped(map) => {
                // `close` may drop the map once the guard is released
                let start = offset as usize;
                Ok(Cow::Owned(map[start..start + len].to_vec()))
            }
            Backing::Handle(file) => {
                let mut buf = vec![0u8; len];
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf)?;
                Ok(Cow::Owned(buf))
            }
            Backing::Empty => Ok(Cow::Borrowed(&[][..])),
        }
    }

    /// Rename the file on disk, keeping the reader open
    pub fn rename(&self, to: impl AsRef<Path>) -> Result<(), StorageError> {
        let to = to.as_ref().to_path_buf();
        let mut inner = self.inner.write();
        if inner.backing.is_none() {
            return Err(StorageError::FileClosed(inner.path.display().to_string()));
        }
        fs::rename(&inner.path, &to)?;
        tracing::debug!(from = %inner.path.display(), to = %to.display(), "File renamed");
        inner.path = to;
        Ok(())
    }

    /// Release the map or handle; later reads fail with `FileClosed`
    ///
    /// Returns false when the reader was already closed.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.write();
        let was_open = inner.backing.take().is_some();
        if was_open {
            tracing::debug!(path = %inner.path.display(), "File closed");
        }
        was_open
    }

    /// File size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current path
    pub fn path(&self) -> PathBuf {
        self.inner.read().path.clone()
    }

    /// True when reads go through a memory map
    pub fn is_mmapped(&self) -> bool {
        self.mmapped
    }

    /// True until `close`
    pub fn is_open(&self) -> bool {
        self.inner.read().backing.is_some()
    }
}

impl std::fmt::Debug for DiskFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFileReader")
            .field("path", &self.path())
            .field("size", &self.size)
            .field("mmapped", &self.mmapped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn data_file(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_both_modes() {
        let file = data_file(b"0123456789");
        for mmap in [true, false] {
            let reader = DiskFileReader::open(file.path(), mmap).unwrap();
            assert_eq!(reader.is_mmapped(), mmap);
            assert_eq!(reader.size(), 10);
            assert_eq!(reader.read_at(2, 3).unwrap().as_ref(), b"234");
            assert_eq!(reader.read_at(0, 10).unwrap().len(), 10);
            assert!(reader.read_at(10, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_out_of_bounds() {
        let file = data_file(b"abc");
        let reader = DiskFileReader::open(file.path(), true).unwrap();
        assert!(matches!(
            reader.read_at(2, 2),
            Err(StorageError::OutOfBounds { offset: 2, len: 2, size: 3 })
        ));
        assert!(matches!(
            reader.read_at(u64::MAX, 1),
            Err(StorageError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_empty_file() {
        let file = data_file(b"");
        let reader = DiskFileReader::open(file.path(), true).unwrap();
        assert!(!reader.is_mmapped());
        assert!(reader.read_at(0, 0).unwrap().is_empty());
        assert!(reader.read_at(0, 1).is_err());
    }

    #[test]
    fn test_close_then_read() {
        let file = data_file(b"abc");
        let reader = DiskFileReader::open(file.path(), false).unwrap();
        assert!(reader.close());
        assert!(!reader.close());
        assert!(!reader.is_open());
        assert!(matches!(reader.read_at(0, 1), Err(StorageError::FileClosed(_))));
    }

    #[test]
    fn test_rename_keeps_reader() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.tsf");
        std::fs::write(&from, b"xyz").unwrap();
        let reader = DiskFileReader::open(&from, true).unwrap();

        let to = dir.path().join("b.tsf");
        reader.rename(&to).unwrap();
        assert_eq!(reader.path(), to);
        assert!(!from.exists());
        assert_eq!(reader.read_at(1, 2).unwrap().as_ref(), b"yz");
    }
}
