//! Page table structure for x86_64.

use x86_64::{
    PhysAddr,
    registers::control::{Cr3, Cr3Flags},
    structures::paging::PhysFrame,
};

use crate::{PhysicalAddress, address::AddressTranslator};

use super::entry::PageEntry;

/// Number of entries in an x86_64 page table.
const ENTRY_COUNT: usize = 512;

/// One level of the x86_64 page table hierarchy.
///
/// Transparent over the hardware layout, so the address of a `PageTable` is the address the
/// MMU walks.
#[repr(transparent)]
pub struct PageTable {
    inner: x86_64::structures::paging::PageTable,
}

impl PageTable {
    /// Creates a new table with every entry cleared.
    pub fn new() -> Self {
        Self {
            inner: x86_64::structures::paging::PageTable::new(),
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        let raw = &self.inner[index];
        PageEntry::from(raw.addr().as_u64() as usize | raw.flags().bits() as usize)
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        // SAFETY: both types are a transparent 64-bit entry with the same layout.
        unsafe { &mut *(&mut self.inner[index] as *mut _ as *mut PageEntry) }
    }

    /// Returns the number of entries in this table.
    pub const fn len(&self) -> usize {
        ENTRY_COUNT
    }

    /// Returns the physical address of this table, as loaded into CR3 or a parent entry.
    pub fn physical_address(&self) -> PhysicalAddress {
        let ptr = self as *const Self as *const u8;
        PhysicalAddress::new(AddressTranslator::current().ptr_to_phys(ptr))
    }

    /// Loads this table into CR3.
    ///
    /// # Safety
    /// The table must map the kernel, the current stack and itself.
    pub unsafe fn activate(&self) {
        let frame = PhysFrame::containing_address(PhysAddr::new(
            self.physical_address().as_usize() as u64,
        ));
        // SAFETY: upheld by the caller.
        unsafe {
            Cr3::write(frame, Cr3Flags::empty());
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
