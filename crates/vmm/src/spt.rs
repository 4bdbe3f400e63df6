//! Supplemental page table.
//!
//! The hardware page tables only describe resident pages. This table describes every page a
//! process may legally touch, keyed by page address, along with how to produce its contents.

use alloc::{sync::Arc, vec::Vec};

use crate::{
    VirtualAddress,
    error::VmError,
    hash::{IndexedMap, Keying, hash_usize},
    page::PageRef,
    page_directory::PageDirectory,
    vm::VirtualMemory,
};

/// Keys page records by their address.
pub struct ByAddress;

impl Keying<PageRef> for ByAddress {
    type Key = VirtualAddress;

    fn key(&self, record: &PageRef) -> VirtualAddress {
        record.va()
    }

    fn hash(&self, va: VirtualAddress) -> u64 {
        hash_usize(va.as_usize())
    }

    fn less(&self, a: VirtualAddress, b: VirtualAddress) -> bool {
        a < b
    }
}

/// The pages of one address space.
pub struct SupplementalPageTable {
    pages: IndexedMap<PageRef, ByAddress>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            pages: IndexedMap::new(ByAddress),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Finds the page containing `va`.
    pub fn find(&self, va: VirtualAddress) -> Option<PageRef> {
        self.pages.find(va.page_base()).cloned()
    }

    /// Adds a page. Fails if a page already exists at the same address.
    pub fn insert(&mut self, record: PageRef) -> Result<(), VmError> {
        self.pages
            .insert(record)
            .map_err(|occupied| VmError::AlreadyMapped(occupied.existing.va()))
    }

    /// Returns true if no page exists in `[base, base + pages * PAGE_SIZE)`.
    pub fn is_range_free(&self, base: VirtualAddress, pages: usize) -> bool {
        (0..pages).all(|i| self.pages.find(base + i * crate::arch::PAGE_SIZE).is_none())
    }

    /// Removes the page at `va` and releases everything it holds.
    pub fn remove(
        &mut self,
        va: VirtualAddress,
        vm: &VirtualMemory,
        directory: &spin::Mutex<PageDirectory>,
    ) -> Result<(), VmError> {
        let record = self
            .pages
            .delete(va.page_base())
            .ok_or(VmError::NotMapped(va))?;
        record.lock().destroy(vm, directory);
        Ok(())
    }

    /// Snapshot of every page, for walks that need to modify the table or lock pages.
    pub fn records(&self) -> Vec<PageRef> {
        self.pages.iter().map(Arc::clone).collect()
    }

    /// Removes and destroys every page.
    pub fn destroy_all(&mut self, vm: &VirtualMemory, directory: &spin::Mutex<PageDirectory>) {
        self.pages
            .clear_with(|record| record.lock().destroy(vm, directory));
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Page, PageRecord, VmConfig};

    #[test]
    fn find_rounds_down() {
        let mut spt = SupplementalPageTable::new();
        let record = PageRecord::new(Page::anon(VirtualAddress::new(0x120), true));
        spt.insert(record.clone()).unwrap();

        let found = spt.find(VirtualAddress::new(0x12F)).unwrap();
        assert!(Arc::ptr_eq(&found, &record));
        assert!(spt.find(VirtualAddress::new(0x130)).is_none());
    }

    #[test]
    fn duplicate_insert_fails_and_keeps_first() {
        let mut spt = SupplementalPageTable::new();
        let va = VirtualAddress::new(0x200);
        let first = PageRecord::new(Page::anon(va, true));
        let second = PageRecord::new(Page::anon(va, false));

        spt.insert(first.clone()).unwrap();
        assert_eq!(spt.insert(second), Err(VmError::AlreadyMapped(va)));

        assert_eq!(spt.len(), 1);
        assert!(Arc::ptr_eq(&spt.find(va).unwrap(), &first));
    }

    #[test]
    fn range_check() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(PageRecord::new(Page::anon(VirtualAddress::new(0x230), true)))
            .unwrap();

        assert!(spt.is_range_free(VirtualAddress::new(0x200), 3));
        assert!(!spt.is_range_free(VirtualAddress::new(0x200), 4));
    }

    #[test]
    fn remove_releases_frame() {
        crate::tests::setup();
        let vm = VirtualMemory::emulated(VmConfig {
            frame_count: 2,
            ..VmConfig::default()
        })
        .unwrap();
        let directory = Arc::new(spin::Mutex::new(PageDirectory::new()));
        let mut spt = SupplementalPageTable::new();
        let va = VirtualAddress::new(0x300);
        let record = PageRecord::new(Page::anon(va, true));
        spt.insert(record.clone()).unwrap();
        vm.claim(&record, &mut record.lock(), &directory).unwrap();

        spt.remove(va, &vm, &directory).unwrap();

        assert!(spt.is_empty());
        assert_eq!(vm.stats().frames_in_use, 0);
        assert_eq!(directory.lock().translate(va), None);
        assert_eq!(spt.remove(va, &vm, &directory), Err(VmError::NotMapped(va)));
    }
}
