//! Page table entry flags for the software MMU.

/// Page table entry flags for the software MMU.
///
/// The low byte of an emulated entry. Bit positions are arbitrary; only the set of bits
/// mirrors x86_64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(usize);

macro_rules! flag_accessors {
    ($($bit:ident => $is:ident, $set:ident;)*) => {
        $(
            #[doc = concat!("Returns whether the ", stringify!($bit), " bit is set.")]
            #[inline]
            pub const fn $is(self) -> bool {
                (self.0 & Self::$bit) != 0
            }

            #[doc = concat!("Sets or clears the ", stringify!($bit), " bit.")]
            #[inline]
            pub fn $set(&mut self, value: bool) {
                if value {
                    self.0 |= Self::$bit;
                } else {
                    self.0 &= !Self::$bit;
                }
            }
        )*
    };
}

impl PageFlags {
    const PRESENT: usize = 1 << 0;
    const WRITABLE: usize = 1 << 1;
    const USER: usize = 1 << 2;
    const ACCESSED: usize = 1 << 4;
    const DIRTY: usize = 1 << 5;

    /// Mask of every bit a flag value may occupy.
    pub const MASK: usize = 0xFF;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the raw bits.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    flag_accessors! {
        PRESENT => is_present, set_present;
        WRITABLE => is_writable, set_writable;
        USER => is_user, set_user;
        ACCESSED => is_accessed, set_accessed;
        DIRTY => is_dirty, set_dirty;
    }
}

impl From<usize> for PageFlags {
    fn from(value: usize) -> Self {
        Self(value & Self::MASK)
    }
}
