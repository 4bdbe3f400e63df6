//! Page table entry flags for x86_64.

use x86_64::structures::paging::PageTableFlags;

/// Page table entry flags for x86_64.
///
/// Thin wrapper over the `x86_64` crate's flags exposing the same accessors as the software
/// MMU, so the rest of the crate never names hardware bits directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

macro_rules! flag_accessors {
    ($($bit:ident => $is:ident, $set:ident;)*) => {
        $(
            #[doc = concat!("Returns whether the ", stringify!($bit), " bit is set.")]
            #[inline]
            pub fn $is(self) -> bool {
                self.0.contains(PageTableFlags::$bit)
            }

            #[doc = concat!("Sets or clears the ", stringify!($bit), " bit.")]
            #[inline]
            pub fn $set(&mut self, value: bool) {
                self.0.set(PageTableFlags::$bit, value);
            }
        )*
    };
}

impl PageFlags {
    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Returns the raw bits.
    pub const fn as_usize(self) -> usize {
        self.0.bits() as usize
    }

    flag_accessors! {
        PRESENT => is_present, set_present;
        WRITABLE => is_writable, set_writable;
        USER_ACCESSIBLE => is_user, set_user;
        ACCESSED => is_accessed, set_accessed;
        DIRTY => is_dirty, set_dirty;
    }
}

impl From<usize> for PageFlags {
    fn from(value: usize) -> Self {
        Self(PageTableFlags::from_bits_truncate(value as u64))
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
