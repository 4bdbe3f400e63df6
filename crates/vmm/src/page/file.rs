//! File-backed pages.
//!
//! The file is the page's home: eviction writes modified contents back instead of using swap,
//! and clean pages are dropped and reread on the next fault.

use alloc::sync::Arc;
use core::fmt;

use super::{Backing, Page, PageKind, PageOperations};
use crate::{
    VirtualAddress,
    error::{FileError, VmError},
    file::File,
    frame::frame_bytes,
    page_directory::PageDirectory,
    vm::VirtualMemory,
};

pub(super) static OPERATIONS: PageOperations = PageOperations {
    kind: PageKind::File,
    swap_in,
    swap_out,
    destroy,
};

/// The pages created by a single mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Address of the first page.
    pub base: VirtualAddress,
    /// Number of pages.
    pub pages: usize,
}

/// Payload of a file-backed page.
#[derive(Clone)]
pub struct FilePage {
    file: Arc<dyn File>,
    offset: usize,
    read_bytes: usize,
    region: Region,
}

impl FilePage {
    /// Describes a page holding `read_bytes` of `file` from `offset`, zero-filled to the end.
    pub(crate) fn new(file: Arc<dyn File>, offset: usize, read_bytes: usize, region: Region) -> Self {
        Self {
            file,
            offset,
            read_bytes,
            region,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }

    fn write_back(&self, bytes: &[u8], va: VirtualAddress) -> Result<(), VmError> {
        let written = self.file.write_at(&bytes[..self.read_bytes], self.offset)?;
        if written != self.read_bytes {
            log::warn!(
                "short write back of {}: {} of {} bytes at offset {:#x}",
                va,
                written,
                self.read_bytes,
                self.offset
            );
            return Err(FileError::Io.into());
        }
        log::trace!("wrote back {} bytes of {} at offset {:#x}", written, va, self.offset);
        Ok(())
    }
}

impl fmt::Debug for FilePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePage")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("region", &self.region)
            .finish()
    }
}

fn file_ref(page: &Page) -> &FilePage {
    match &page.backing {
        Backing::File(file) => file,
        _ => panic!("file page operation on {:?}", page.operations().kind),
    }
}

fn swap_in(page: &mut Page, _vm: &VirtualMemory, buf: &mut [u8]) -> Result<(), VmError> {
    let file = file_ref(page);
    let read = file.file.read_at(&mut buf[..file.read_bytes], file.offset)?;
    buf[read..].fill(0);
    Ok(())
}

fn swap_out(page: &mut Page, _vm: &VirtualMemory, directory: &mut PageDirectory) -> Result<(), VmError> {
    let va = page.va();
    let Some(frame) = page.frame else {
        return Ok(());
    };

    if page.writable() && directory.is_dirty(va) {
        // SAFETY: the evictor holds this page's lock and the frame is still linked to it.
        let bytes = unsafe { frame_bytes(frame) };
        file_ref(page).write_back(bytes, va)?;
        directory.set_dirty(va, false);
    }
    Ok(())
}

fn destroy(page: &mut Page, _vm: &VirtualMemory, directory: &spin::Mutex<PageDirectory>) {
    let va = page.va();
    let Some(frame) = page.frame else {
        return;
    };

    if page.writable() && directory.lock().is_dirty(va) {
        // SAFETY: the caller holds this page's lock and the frame is still linked to it.
        let bytes = unsafe { frame_bytes(frame) };
        if let Err(err) = file_ref(page).write_back(bytes, va) {
            log::warn!("failed to write back {}: {}", va, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryFile, arch::PAGE_SIZE};

    fn page_over(file: &MemoryFile, read_bytes: usize) -> FilePage {
        let region = Region {
            base: VirtualAddress::new(0x1000),
            pages: 1,
        };
        FilePage::new(file.reopen().unwrap(), 0, read_bytes, region)
    }

    #[test]
    fn write_back_stores_read_bytes() {
        let file = MemoryFile::new(vec![0; PAGE_SIZE]);
        let page = page_over(&file, 8);
        let bytes = [7u8; PAGE_SIZE];

        page.write_back(&bytes, VirtualAddress::new(0x1000)).unwrap();

        let contents = file.contents();
        assert_eq!(&contents[..8], &[7; 8]);
        assert_eq!(&contents[8..], &[0; PAGE_SIZE - 8]);
    }

    #[test]
    fn short_write_back_is_an_error() {
        let file = MemoryFile::new(vec![0; 4]);
        let page = page_over(&file, PAGE_SIZE);
        let bytes = [7u8; PAGE_SIZE];

        assert_eq!(
            page.write_back(&bytes, VirtualAddress::new(0x1000)),
            Err(VmError::File(FileError::Io))
        );
        assert_eq!(file.contents(), vec![7; 4]);
    }
}
