//! Backing files.
//!
//! The filesystem is outside this crate; file-backed pages and image segments see it only
//! through the [`File`] trait. Every mapping holds its own handle obtained from
//! [`File::reopen`], so closing the descriptor a mapping was created from leaves the mapping
//! intact. Dropping the last handle closes the file.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::FileError;

/// An open file.
pub trait File: Send + Sync {
    /// Opens an independent handle to the same file.
    fn reopen(&self) -> Result<Arc<dyn File>, FileError>;

    /// Reads up to `buf.len()` bytes starting at `offset`, returning how many were read.
    ///
    /// Reading at or past the end of the file reads nothing.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, FileError>;

    /// Writes up to `buf.len()` bytes starting at `offset`, returning how many were written.
    ///
    /// Files never grow: bytes past the current end are dropped.
    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, FileError>;

    /// Current length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file held in kernel memory.
///
/// All handles reopened from one `MemoryFile` share the same contents.
pub struct MemoryFile {
    data: Arc<spin::Mutex<Vec<u8>>>,
    handles: Arc<AtomicUsize>,
}

impl MemoryFile {
    /// Creates a file holding `contents`.
    pub fn new(contents: Vec<u8>) -> Self {
        Self {
            data: Arc::new(spin::Mutex::new(contents)),
            handles: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Number of handles to this file that are still open.
    pub fn open_handles(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::AcqRel);
    }
}

impl File for MemoryFile {
    fn reopen(&self) -> Result<Arc<dyn File>, FileError> {
        self.handles.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemoryFile {
            data: Arc::clone(&self.data),
            handles: Arc::clone(&self.handles),
        }))
    }

    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, FileError> {
        let data = self.data.lock();
        let Some(available) = data.get(offset..) else {
            return Ok(0);
        };
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, FileError> {
        let mut data = self.data.lock();
        let Some(available) = data.get_mut(offset..) else {
            return Ok(0);
        };
        let count = available.len().min(buf.len());
        available[..count].copy_from_slice(&buf[..count]);
        Ok(count)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_at_clamps_to_end() {
        let file = MemoryFile::new(b"hello".to_vec());
        let mut buf = [0u8; 8];

        assert_eq!(file.read_at(&mut buf, 2).unwrap(), 3);
        assert_eq!(&buf[..3], b"llo");
        assert_eq!(file.read_at(&mut buf, 5).unwrap(), 0);
        assert_eq!(file.read_at(&mut buf, 50).unwrap(), 0);
    }

    #[test]
    fn write_at_never_grows() {
        let file = MemoryFile::new(b"hello".to_vec());
        assert_eq!(file.write_at(b"XYZW", 3).unwrap(), 2);
        assert_eq!(file.contents(), b"helXY");
        assert_eq!(file.len(), 5);
    }

    #[test]
    fn reopened_handles_share_contents() {
        let file = MemoryFile::new(b"abcd".to_vec());
        let other = file.reopen().unwrap();
        assert_eq!(file.open_handles(), 2);

        other.write_at(b"Z", 0).unwrap();
        assert_eq!(file.contents(), b"Zbcd");

        drop(other);
        assert_eq!(file.open_handles(), 1);
    }
}
