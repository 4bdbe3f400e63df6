//! Page table entry for the software MMU.

use crate::{FrameNumber, PhysicalAddress};

use super::flags::PageFlags;

/// A single emulated page table entry.
///
/// Layout:
/// - Bits 0-7: flags
/// - Bits 8-19: physical frame number (12 bits, 16-byte frames)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    const FRAME_SHIFT: usize = 8;

    /// Creates a new entry pointing at `address`.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_aligned(super::PAGE_SIZE),
            "physical address must be page-aligned"
        );
        let frame = address.frame_number().as_usize();
        Self((frame << Self::FRAME_SHIFT) | flags.as_usize())
    }

    /// Returns the physical address stored in this entry, or None if it is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        self.is_present()
            .then(|| FrameNumber::new(self.0 >> Self::FRAME_SHIFT).start())
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from(self.0)
    }

    /// Replaces the flags, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & !PageFlags::MASK) | flags.as_usize();
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
