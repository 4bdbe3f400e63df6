//! Hardware page table management for one address space.
//!
//! `PageDirectory` wraps the architecture's root `PageTable` and offers the handful of
//! operations the virtual memory manager needs: install and clear user mappings, and query or
//! clear the accessed and dirty bits that drive eviction and write-back.

use crate::{
    PhysicalAddress, VirtualAddress,
    address::AddressTranslator,
    arch::{self, PageEntry, PageFlags, PageTable},
    error::MapError,
};

#[cfg(not(any(test, feature = "software-emulation")))]
use alloc::boxed::Box;

/// Allocates an intermediate page table inside emulated memory.
#[cfg(any(test, feature = "software-emulation"))]
fn alloc_page_table() -> Result<*mut PageTable, MapError> {
    let translator = AddressTranslator::current();
    let phys = translator
        .allocate(core::mem::size_of::<PageTable>(), arch::PAGE_SIZE)
        .ok_or(MapError::OutOfMemory)?;
    let ptr = translator.phys_to_ptr::<PageTable>(phys);
    // SAFETY: freshly carved, suitably aligned and exclusively ours.
    unsafe { ptr.write(PageTable::new()) };
    Ok(ptr)
}

/// Allocates an intermediate page table from the kernel heap.
#[cfg(not(any(test, feature = "software-emulation")))]
fn alloc_page_table() -> Result<*mut PageTable, MapError> {
    Ok(Box::into_raw(Box::new(PageTable::new())))
}

/// Releases an intermediate table created by `alloc_page_table`.
///
/// # Safety
/// `ptr` must come from `alloc_page_table` and must not be used afterwards.
unsafe fn release_page_table(ptr: *mut PageTable) {
    #[cfg(any(test, feature = "software-emulation"))]
    // SAFETY: upheld by the caller. Emulated memory is never reused, so only the table's own
    // heap storage is released.
    unsafe {
        core::ptr::drop_in_place(ptr)
    };

    #[cfg(not(any(test, feature = "software-emulation")))]
    // SAFETY: upheld by the caller.
    unsafe {
        drop(Box::from_raw(ptr))
    };
}

/// Follows a present non-leaf entry to the table it points at.
///
/// # Safety
/// The entry must have been installed by `walk_or_create`.
unsafe fn next_table(entry: PageEntry) -> Option<*mut PageTable> {
    let phys = entry.address()?;
    Some(AddressTranslator::current().phys_to_ptr::<PageTable>(phys.as_usize()))
}

/// The kind of memory access being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Why an emulated access trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessFault {
    /// The faulting address.
    pub address: VirtualAddress,
    /// Whether a mapping existed (a protection violation) or not (a missing page).
    pub present: bool,
    /// Whether the access was a write.
    pub write: bool,
}

/// The page tables of one address space.
pub struct PageDirectory {
    root: PageTable,
}

impl PageDirectory {
    /// Creates a page directory with an empty root table.
    pub fn new() -> Self {
        Self {
            root: PageTable::new(),
        }
    }

    /// Maps the user page at `virt` to the frame at `phys`.
    ///
    /// Fails if `virt` is already mapped or an intermediate table cannot be allocated; in both
    /// cases nothing is installed.
    ///
    /// # Panics
    /// Panics if either address is not page-aligned.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        writable: bool,
    ) -> Result<(), MapError> {
        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );
        assert!(
            phys.is_aligned(arch::PAGE_SIZE),
            "physical address must be page-aligned"
        );

        let entry = self.walk_or_create(virt)?;
        if entry.is_present() {
            return Err(MapError::AlreadyMapped);
        }

        let mut flags = PageFlags::empty();
        flags.set_present(true);
        flags.set_user(true);
        flags.set_writable(writable);
        *entry = PageEntry::new(phys, flags);
        Ok(())
    }

    /// Clears the mapping at `virt`, returning the frame it pointed at.
    pub fn unmap(&mut self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.walk_mut(virt)?;
        let phys = entry.address()?;
        entry.clear();
        arch::flush(virt.as_usize());
        Some(phys)
    }

    /// Returns the frame mapped at `virt`, if any.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.walk(virt)?.address()
    }

    /// Returns whether the page at `virt` has been written since the bit was last cleared.
    ///
    /// Unmapped pages are never dirty.
    pub fn is_dirty(&self, virt: VirtualAddress) -> bool {
        self.walk(virt)
            .is_some_and(|entry| entry.is_present() && entry.flags().is_dirty())
    }

    /// Sets or clears the dirty bit of the page at `virt`. Unmapped pages are ignored.
    pub fn set_dirty(&mut self, virt: VirtualAddress, dirty: bool) {
        self.update_flags(virt, |flags| flags.set_dirty(dirty));
    }

    /// Returns whether the page at `virt` has been referenced since the bit was last cleared.
    pub fn is_accessed(&self, virt: VirtualAddress) -> bool {
        self.walk(virt)
            .is_some_and(|entry| entry.is_present() && entry.flags().is_accessed())
    }

    /// Sets or clears the accessed bit of the page at `virt`. Unmapped pages are ignored.
    pub fn set_accessed(&mut self, virt: VirtualAddress, accessed: bool) {
        self.update_flags(virt, |flags| flags.set_accessed(accessed));
    }

    /// Emulates a user-mode access the way the MMU would.
    ///
    /// Checks presence and permissions, sets the accessed bit (and the dirty bit for writes),
    /// and returns the physical address of the byte at `virt`.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn access(&mut self, virt: VirtualAddress, access: Access) -> Result<PhysicalAddress, AccessFault> {
        let write = access == Access::Write;
        let fault = |present| AccessFault {
            address: virt,
            present,
            write,
        };

        let page = virt.page_base();
        let entry = self.walk_mut(page).filter(|entry| entry.is_present());
        let Some(entry) = entry else {
            return Err(fault(false));
        };

        let mut flags = entry.flags();
        if !flags.is_user() || (write && !flags.is_writable()) {
            return Err(fault(true));
        }

        flags.set_accessed(true);
        if write {
            flags.set_dirty(true);
        }
        entry.set_flags(flags);

        #[cfg(feature = "detailed-logging")]
        log::trace!("{:?} {} -> {:?}", access, virt, entry.address());

        let frame = entry.address().ok_or(fault(false))?;
        Ok(frame + virt.page_offset())
    }

    /// Makes this directory the active address space.
    ///
    /// # Safety
    /// The directory must map everything the kernel touches after the switch.
    pub unsafe fn activate(&self) {
        // SAFETY: upheld by the caller.
        unsafe { self.root.activate() }
    }

    fn update_flags(&mut self, virt: VirtualAddress, update: impl FnOnce(&mut PageFlags)) {
        if let Some(entry) = self.walk_mut(virt).filter(|entry| entry.is_present()) {
            let mut flags = entry.flags();
            update(&mut flags);
            entry.set_flags(flags);
            arch::flush(virt.as_usize());
        }
    }

    /// Returns a copy of the leaf entry for `virt`, or None if an intermediate table is missing.
    fn walk(&self, virt: VirtualAddress) -> Option<PageEntry> {
        let mut table: *const PageTable = &self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            // SAFETY: `table` is the root or a table installed by `walk_or_create`.
            let entry = unsafe { (*table).entry(virt.page_index(level)) };
            // SAFETY: non-leaf entries are only ever installed by `walk_or_create`.
            table = unsafe { next_table(entry)? };
        }
        // SAFETY: as above.
        Some(unsafe { (*table).entry(virt.page_index(0)) })
    }

    /// Returns the leaf entry for `virt`, or None if an intermediate table is missing.
    fn walk_mut(&mut self, virt: VirtualAddress) -> Option<&mut PageEntry> {
        let mut table: *mut PageTable = &mut self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            // SAFETY: `table` is the root or a table installed by `walk_or_create`.
            let entry = unsafe { (*table).entry(virt.page_index(level)) };
            // SAFETY: non-leaf entries are only ever installed by `walk_or_create`.
            table = unsafe { next_table(entry)? };
        }
        // SAFETY: as above; the returned borrow is tied to `&mut self`.
        Some(unsafe { (*table).entry_mut(virt.page_index(0)) })
    }

    /// Returns the leaf entry for `virt`, allocating intermediate tables as needed.
    fn walk_or_create(&mut self, virt: VirtualAddress) -> Result<&mut PageEntry, MapError> {
        let mut table: *mut PageTable = &mut self.root;
        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            // SAFETY: `table` is the root or a table installed below.
            let entry = unsafe { (*table).entry_mut(virt.page_index(level)) };
            if !entry.is_present() {
                let child = alloc_page_table()?;
                // SAFETY: `child` was just initialized by `alloc_page_table`.
                let phys = unsafe { (*child).physical_address() };

                let mut flags = PageFlags::empty();
                flags.set_present(true);
                flags.set_writable(true);
                flags.set_user(true);
                *entry = PageEntry::new(phys, flags);
            }
            // SAFETY: the entry is present and was installed by this function.
            table = unsafe { next_table(*entry).ok_or(MapError::OutOfMemory)? };
        }
        // SAFETY: as above; the returned borrow is tied to `&mut self`.
        Ok(unsafe { (*table).entry_mut(virt.page_index(0)) })
    }

    /// Releases every intermediate table below `table`, which sits at `level`.
    ///
    /// # Safety
    /// Every present entry of `table` must point at a table from `alloc_page_table`.
    unsafe fn release_children(table: &mut PageTable, level: usize) {
        for index in 0..table.len() {
            let entry = table.entry(index);
            // SAFETY: upheld by the caller.
            let Some(child) = (unsafe { next_table(entry) }) else {
                continue;
            };
            if level > 1 {
                // SAFETY: children of non-leaf tables follow the same contract.
                unsafe { Self::release_children(&mut *child, level - 1) };
            }
            // SAFETY: the child is no longer referenced once its entry is cleared.
            unsafe { release_page_table(child) };
            table.entry_mut(index).clear();
        }
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PageDirectory {
    fn drop(&mut self) {
        let level = arch::PAGE_TABLE_LEVELS - 1;
        // SAFETY: all non-leaf entries reachable from the root were created by
        // `walk_or_create`.
        unsafe { Self::release_children(&mut self.root, level) };
    }
}
