//! Multi-page regions: process image segments, memory-mapped files and the initial stack.
//!
//! Regions are set up lazily. Every page starts out uninitialized and is only read from its
//! file when first touched.

use alloc::sync::Arc;

use crate::{
    AddressSpace, VirtualAddress,
    arch::{PAGE_SIZE, USER_SPACE_END, USER_STACK_TOP},
    error::{FileError, VmError},
    file::File,
    page::{Backing, FilePage, Loader, Page, Region, UninitPage},
};

/// What the pages of a region turn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Anonymous pages initialized from the file. Changes never reach the file.
    Segment,
    /// File-backed pages. Changes are written back to the file.
    Mapping,
}

/// A stretch of a file laid out in memory: `read_bytes` from `offset`, then `zero_bytes` of
/// zeroes.
#[derive(Clone)]
pub struct FileExtent {
    pub file: Arc<dyn File>,
    pub offset: usize,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

/// Loads `read_bytes` of `file` at `offset` into the start of the page and zeroes the rest.
fn segment_loader(file: Arc<dyn File>, offset: usize, read_bytes: usize) -> Loader {
    Arc::new(move |buf: &mut [u8]| {
        let read = file.read_at(&mut buf[..read_bytes], offset)?;
        if read != read_bytes {
            return Err(FileError::OutOfRange {
                offset: offset + read,
            }
            .into());
        }
        buf[read_bytes..].fill(0);
        Ok(())
    })
}

impl AddressSpace {
    /// Registers the pages of `extent` starting at `base`.
    ///
    /// Fails without registering anything if `base` or the file offset is misaligned, the
    /// extent is empty or not a whole number of pages, the range leaves user space, or any
    /// page in the range is already in use.
    pub fn load_region(
        &mut self,
        kind: RegionKind,
        base: VirtualAddress,
        extent: FileExtent,
        writable: bool,
    ) -> Result<Region, VmError> {
        let total = extent
            .read_bytes
            .checked_add(extent.zero_bytes)
            .ok_or(VmError::InvalidLength)?;
        if !base.is_aligned(PAGE_SIZE) || extent.offset % PAGE_SIZE != 0 {
            return Err(VmError::Misaligned);
        }
        if total == 0 || total % PAGE_SIZE != 0 {
            return Err(VmError::InvalidLength);
        }
        let end = base
            .as_usize()
            .checked_add(total)
            .filter(|&end| base.as_usize() >= PAGE_SIZE && end <= USER_SPACE_END)
            .ok_or(VmError::InvalidAccess(base.as_usize()))?;

        let region = Region {
            base,
            pages: total / PAGE_SIZE,
        };
        if !self.spt.is_range_free(base, region.pages) {
            return Err(VmError::AlreadyMapped(base));
        }

        let mut remaining = extent.read_bytes;
        for index in 0..region.pages {
            let va = base + index * PAGE_SIZE;
            let offset = extent.offset + index * PAGE_SIZE;
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;

            let file = Arc::clone(&extent.file);
            let uninit = match kind {
                RegionKind::Segment => {
                    UninitPage::anon(Some(segment_loader(file, offset, read_bytes)))
                }
                RegionKind::Mapping => {
                    UninitPage::file(FilePage::new(file, offset, read_bytes, region))
                }
            };
            self.insert_page(Page::new(va, writable, Backing::Uninit(uninit)))?;
        }

        log::debug!(
            "{:?} of {} pages at {:#x}..{:#x}, file offset {:#x}",
            kind,
            region.pages,
            base.as_usize(),
            end,
            extent.offset
        );
        Ok(region)
    }

    /// Registers one segment of an executable: `read_bytes` from `offset` in `file`, followed
    /// by `zero_bytes` of zeroes, starting at `upage`.
    pub fn load_segment(
        &mut self,
        file: &Arc<dyn File>,
        offset: usize,
        upage: VirtualAddress,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        let extent = FileExtent {
            file: Arc::clone(file),
            offset,
            read_bytes,
            zero_bytes,
        };
        self.load_region(RegionKind::Segment, upage, extent, writable)?;
        Ok(())
    }

    /// Maps `length` bytes of `file` from `offset` at `addr`.
    ///
    /// The mapping keeps its own handle to the file. Bytes past the end of the file read as
    /// zero and are never written back.
    pub fn mmap(
        &mut self,
        addr: usize,
        length: usize,
        writable: bool,
        file: &dyn File,
        offset: usize,
    ) -> Result<VirtualAddress, VmError> {
        if addr == 0 {
            return Err(VmError::InvalidAccess(addr));
        }
        if addr % PAGE_SIZE != 0 || offset % PAGE_SIZE != 0 {
            return Err(VmError::Misaligned);
        }
        if length == 0 || file.is_empty() {
            return Err(VmError::InvalidLength);
        }
        let base = VirtualAddress::try_new(addr)
            .filter(|va| va.is_user())
            .ok_or(VmError::InvalidAccess(addr))?;

        let span = length
            .checked_next_multiple_of(PAGE_SIZE)
            .ok_or(VmError::InvalidLength)?;
        let read_bytes = length.min(file.len().saturating_sub(offset));
        let extent = FileExtent {
            file: file.reopen()?,
            offset,
            read_bytes,
            zero_bytes: span - read_bytes,
        };
        self.load_region(RegionKind::Mapping, base, extent, writable)?;
        Ok(base)
    }

    /// Removes the mapping created by [`AddressSpace::mmap`] at `addr`.
    ///
    /// Dirty pages are written back to the file first. `addr` must be the address `mmap`
    /// returned.
    pub fn munmap(&mut self, addr: VirtualAddress) -> Result<(), VmError> {
        let record = self.spt.find(addr).ok_or(VmError::NotMapped(addr))?;
        let region = record
            .lock()
            .region()
            .filter(|region| region.base == addr)
            .ok_or(VmError::NotMapped(addr))?;

        log::debug!("unmapping {} pages at {}", region.pages, region.base);
        for index in 0..region.pages {
            self.spt
                .remove(region.base + index * PAGE_SIZE, &self.vm, &self.directory)?;
        }
        Ok(())
    }

    /// Creates the first stack page, just below [`USER_STACK_TOP`], and returns the initial
    /// stack pointer.
    pub fn setup_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let bottom = VirtualAddress::new(USER_STACK_TOP - PAGE_SIZE);
        self.alloc_page(bottom, true, None)?;
        self.claim(bottom)?;

        #[cfg(any(test, feature = "software-emulation"))]
        self.set_stack_pointer(USER_STACK_TOP);

        Ok(VirtualAddress::new(USER_STACK_TOP))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MemoryFile, PageKind,
        address_space::tests::{address_space, pattern},
    };

    fn file_of(pages: usize) -> MemoryFile {
        let mut contents = alloc::vec::Vec::new();
        for i in 0..pages {
            contents.extend_from_slice(&pattern(i as u8));
        }
        MemoryFile::new(contents)
    }

    #[test]
    fn mmap_is_lazy_and_reads_file() {
        let mut space = address_space(8, 8);
        let file = file_of(2);

        let base = space.mmap(0x1000, 2 * PAGE_SIZE, false, &file, 0).unwrap();

        assert_eq!(space.pages().len(), 2);
        assert_eq!(space.vm().stats().frames_in_use, 0);
        let record = space.find_page(base).unwrap();
        assert_eq!(record.lock().kind(), PageKind::File);

        let mut buf = [0u8; PAGE_SIZE];
        space.read_user(0x1000 + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(buf, pattern(1));
    }

    #[test]
    fn mmap_past_end_of_file_reads_zeroes() {
        let mut space = address_space(8, 8);
        let file = MemoryFile::new(b"abc".to_vec());

        space.mmap(0x1000, 2 * PAGE_SIZE, true, &file, 0).unwrap();

        let mut buf = [0xFFu8; 2 * PAGE_SIZE];
        space.read_user(0x1000, &mut buf).unwrap();
        assert_eq!(&buf[..3], b"abc");
        assert!(buf[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn writable_mapping_writes_back_on_munmap() {
        let mut space = address_space(8, 8);
        let file = file_of(2);
        let base = space.mmap(0x1000, 2 * PAGE_SIZE, true, &file, 0).unwrap();
        assert_eq!(file.open_handles(), 2);

        space.write_user(0x1000 + PAGE_SIZE + 2, b"XY").unwrap();
        space.munmap(base).unwrap();

        assert!(space.pages().is_empty());
        assert_eq!(file.open_handles(), 1);
        let contents = file.contents();
        assert_eq!(&contents[PAGE_SIZE + 2..PAGE_SIZE + 4], b"XY");
        assert_eq!(&contents[..PAGE_SIZE], &pattern(0));
    }

    #[test]
    fn read_only_mapping_never_writes_back() {
        let mut space = address_space(8, 8);
        let file = file_of(1);
        let base = space.mmap(0x1000, PAGE_SIZE, false, &file, 0).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        space.read_user(0x1000, &mut buf).unwrap();
        assert!(space.write_user(0x1000, b"Z").is_err());
        space.munmap(base).unwrap();

        assert_eq!(file.contents(), pattern(0));
    }

    #[test]
    fn dirty_mapping_written_back_on_eviction() {
        let mut space = address_space(2, 8);
        let file = file_of(1);
        space.mmap(0x1000, PAGE_SIZE, true, &file, 0).unwrap();
        space.write_user(0x1000, b"Q").unwrap();

        // Push the mapped page out.
        for i in 0..4 {
            let addr = 0x2000 + i * PAGE_SIZE;
            space.alloc_page(VirtualAddress::new(addr), true, None).unwrap();
            space.write_user(addr, &[1]).unwrap();
        }

        assert!(!space.find_page(VirtualAddress::new(0x1000)).unwrap().lock().is_resident());
        assert_eq!(file.contents()[0], b'Q');

        let mut buf = [0u8; 1];
        space.read_user(0x1000, &mut buf).unwrap();
        assert_eq!(buf, *b"Q");
    }

    #[test]
    fn mmap_rejects_bad_arguments() {
        let mut space = address_space(8, 8);
        let file = file_of(2);
        let empty = MemoryFile::new(alloc::vec::Vec::new());

        assert_eq!(
            space.mmap(0, PAGE_SIZE, true, &file, 0),
            Err(VmError::InvalidAccess(0))
        );
        assert_eq!(
            space.mmap(0x1001, PAGE_SIZE, true, &file, 0),
            Err(VmError::Misaligned)
        );
        assert_eq!(
            space.mmap(0x1000, PAGE_SIZE, true, &file, 3),
            Err(VmError::Misaligned)
        );
        assert_eq!(
            space.mmap(0x1000, 0, true, &file, 0),
            Err(VmError::InvalidLength)
        );
        assert_eq!(
            space.mmap(0x1000, PAGE_SIZE, true, &empty, 0),
            Err(VmError::InvalidLength)
        );
        assert_eq!(
            space.mmap(USER_SPACE_END - PAGE_SIZE, 2 * PAGE_SIZE, true, &file, 0),
            Err(VmError::InvalidAccess(USER_SPACE_END - PAGE_SIZE))
        );
        assert!(space.pages().is_empty());
        assert_eq!(file.open_handles(), 1);
    }

    #[test]
    fn mmap_of_unrepresentable_length_fails() {
        let mut space = address_space(8, 8);
        let file = file_of(2);

        assert_eq!(
            space.mmap(0x1000, usize::MAX, true, &file, 0),
            Err(VmError::InvalidLength)
        );
        assert_eq!(
            space.mmap(0x1000, usize::MAX - PAGE_SIZE, true, &file, 0),
            Err(VmError::InvalidAccess(0x1000))
        );
        assert!(space.pages().is_empty());
        assert_eq!(file.open_handles(), 1);
    }

    #[test]
    fn overlapping_mmap_fails_without_changes() {
        let mut space = address_space(8, 8);
        let file = file_of(4);
        space.mmap(0x1020, 2 * PAGE_SIZE, true, &file, 0).unwrap();

        assert_eq!(
            space.mmap(0x1000, 3 * PAGE_SIZE, true, &file, 0),
            Err(VmError::AlreadyMapped(VirtualAddress::new(0x1000)))
        );
        assert_eq!(space.pages().len(), 2);
        assert!(space.find_page(VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn munmap_releases_exactly_its_pages() {
        let mut space = address_space(8, 8);
        let file = file_of(4);
        let first = space.mmap(0x1000, 3 * PAGE_SIZE, true, &file, 0).unwrap();
        let second = space
            .mmap(0x1030, 2 * PAGE_SIZE, true, &file, PAGE_SIZE)
            .unwrap();
        space.read_user(0x1000, &mut [0u8; 4]).unwrap();

        space.munmap(first).unwrap();

        assert_eq!(space.pages().len(), 2);
        assert!(space.find_page(second).is_some());
        assert_eq!(space.vm().stats().frames_in_use, 0);
    }

    #[test]
    fn munmap_requires_mapping_base() {
        let mut space = address_space(8, 8);
        let file = file_of(2);
        space.mmap(0x1000, 2 * PAGE_SIZE, true, &file, 0).unwrap();
        space.alloc_page(VirtualAddress::new(0x2000), true, None).unwrap();

        let inner = VirtualAddress::new(0x1010);
        assert_eq!(space.munmap(inner), Err(VmError::NotMapped(inner)));
        let anon = VirtualAddress::new(0x2000);
        assert_eq!(space.munmap(anon), Err(VmError::NotMapped(anon)));
        assert_eq!(space.pages().len(), 3);
    }

    #[test]
    fn mapping_outlives_caller_handle() {
        let mut space = address_space(8, 8);
        let file = file_of(1);
        let reader = file.reopen().unwrap();
        space.mmap(0x1000, PAGE_SIZE, false, reader.as_ref(), 0).unwrap();
        drop(reader);

        let mut buf = [0u8; PAGE_SIZE];
        space.read_user(0x1000, &mut buf).unwrap();
        assert_eq!(buf, pattern(0));
    }

    #[test]
    fn segment_pages_load_lazily_and_stay_private() {
        let mut space = address_space(2, 8);
        let file: Arc<dyn File> = Arc::new(file_of(2));
        let upage = VirtualAddress::new(0x1000);
        space
            .load_segment(&file, 0, upage, PAGE_SIZE + 5, PAGE_SIZE - 5, true)
            .unwrap();

        let record = space.find_page(upage).unwrap();
        assert!(record.lock().is_uninit());
        assert_eq!(record.lock().kind(), PageKind::Anon);
        assert_eq!(record.lock().region(), None);

        let mut buf = [0u8; PAGE_SIZE];
        space.read_user(0x1000 + PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf[..5], &pattern(1)[..5]);
        assert!(buf[5..].iter().all(|&b| b == 0));

        space.write_user(0x1000, b"W").unwrap();
        space.destroy_all();

        // The executable is never modified.
        let mut first = [0u8; PAGE_SIZE];
        file.read_at(&mut first, 0).unwrap();
        assert_eq!(first, pattern(0));
    }

    #[test]
    fn clean_segment_page_reloads_after_eviction() {
        let mut space = address_space(2, 8);
        let file: Arc<dyn File> = Arc::new(file_of(1));
        space
            .load_segment(&file, 0, VirtualAddress::new(0x1000), PAGE_SIZE, 0, false)
            .unwrap();
        space.read_user(0x1000, &mut [0u8; 1]).unwrap();

        for i in 0..4 {
            let addr = 0x2000 + i * PAGE_SIZE;
            space.alloc_page(VirtualAddress::new(addr), true, None).unwrap();
            space.write_user(addr, &[1]).unwrap();
        }
        let segment = space.find_page(VirtualAddress::new(0x1000)).unwrap();
        assert!(!segment.lock().is_resident());
        // Only the dirty anonymous pages went to swap.
        let evicted = (0..4)
            .filter_map(|i| space.find_page(VirtualAddress::new(0x2000 + i * PAGE_SIZE)))
            .filter(|record| !record.lock().is_resident())
            .count();
        assert_eq!(space.vm().stats().swap_in_use, evicted);

        let mut buf = [0u8; PAGE_SIZE];
        space.read_user(0x1000, &mut buf).unwrap();
        assert_eq!(buf, pattern(0));
    }

    #[test]
    fn truncated_segment_fails_to_load() {
        let mut space = address_space(2, 8);
        let file: Arc<dyn File> = Arc::new(MemoryFile::new(b"short".to_vec()));
        space
            .load_segment(&file, 0, VirtualAddress::new(0x1000), PAGE_SIZE, 0, false)
            .unwrap();

        assert!(space.read_user(0x1000, &mut [0u8; 1]).is_err());
        assert_eq!(space.vm().stats().frames_in_use, 0);
    }

    #[test]
    fn oversized_segment_is_rejected() {
        let mut space = address_space(2, 8);
        let file: Arc<dyn File> = Arc::new(file_of(1));
        let upage = VirtualAddress::new(0x1000);

        assert_eq!(
            space.load_segment(&file, 0, upage, PAGE_SIZE, usize::MAX - 4, true),
            Err(VmError::InvalidLength)
        );
        assert_eq!(
            space.load_segment(&file, 0, upage, 0, usize::MAX - (PAGE_SIZE - 1), true),
            Err(VmError::InvalidAccess(0x1000))
        );
        assert!(space.pages().is_empty());
    }

    #[test]
    fn setup_stack_claims_top_page() {
        let mut space = address_space(4, 8);
        let sp = space.setup_stack().unwrap();
        assert_eq!(sp.as_usize(), USER_STACK_TOP);

        let record = space
            .find_page(VirtualAddress::new(USER_STACK_TOP - 1))
            .unwrap();
        assert!(record.lock().is_resident());

        space.write_user(USER_STACK_TOP - 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(space.setup_stack(), Err(VmError::AlreadyMapped(record.va())));
    }

    #[test]
    fn process_exit_writes_back_mappings() {
        let mut space = address_space(4, 8);
        let file = file_of(1);
        space.mmap(0x1000, PAGE_SIZE, true, &file, 0).unwrap();
        space.write_user(0x1000, b"exit").unwrap();

        drop(space);

        assert_eq!(&file.contents()[..4], b"exit");
        assert_eq!(file.open_handles(), 1);
    }
}
