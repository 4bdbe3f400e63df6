//! Page table structure for the software MMU.

use alloc::boxed::Box;

use crate::{PhysicalAddress, address::AddressTranslator};

use super::entry::PageEntry;

/// With 4-bit indexes, every table has 16 entries.
const ENTRY_COUNT: usize = 16;

/// One level of an emulated page table.
///
/// Address layout:
/// - Bits 0-3: Page offset (16 bytes)
/// - Bits 4-7: Level 0 index
/// - Bits 8-11: Level 1 index
/// - Bits 12-15: Level 2 index (root)
pub struct PageTable {
    entries: Box<[PageEntry; ENTRY_COUNT]>,
}

impl PageTable {
    /// Creates a new table with every entry cleared.
    pub fn new() -> Self {
        Self {
            entries: Box::new([PageEntry::default(); ENTRY_COUNT]),
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 16.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 16.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Returns the number of entries in this table.
    pub const fn len(&self) -> usize {
        ENTRY_COUNT
    }

    /// Returns the physical address of this table.
    ///
    /// Only meaningful for tables that live inside emulated memory.
    pub fn physical_address(&self) -> PhysicalAddress {
        let ptr = self as *const Self as *const u8;
        PhysicalAddress::new(AddressTranslator::current().ptr_to_phys(ptr))
    }

    /// Makes this table the active root.
    ///
    /// The emulated MMU keeps no global root, so this does nothing.
    ///
    /// # Safety
    /// Same contract as the hardware implementation: the table must map everything the
    /// caller is about to touch.
    pub unsafe fn activate(&self) {}
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
