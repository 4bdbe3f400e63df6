//! Page table entry for x86_64.

use crate::PhysicalAddress;

use super::flags::PageFlags;

/// A single x86_64 page table entry: bits 12-51 hold the frame address, the rest are flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    const ADDRESS_MASK: usize = 0x000F_FFFF_FFFF_F000;
    const FLAGS_MASK: usize = !Self::ADDRESS_MASK;

    /// Creates a new entry pointing at `address`.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_aligned(super::PAGE_SIZE),
            "physical address must be page-aligned"
        );
        Self((address.as_usize() & Self::ADDRESS_MASK) | (flags.as_usize() & Self::FLAGS_MASK))
    }

    /// Returns the physical address stored in this entry, or None if it is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_present()
            .then(|| PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from(self.0 & Self::FLAGS_MASK)
    }

    /// Replaces the flags, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | (flags.as_usize() & Self::FLAGS_MASK);
    }

    /// Returns whether this entry is present.
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for PageEntry {
    fn from(value: usize) -> Self {
        Self(value)
    }
}
