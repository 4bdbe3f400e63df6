//! Software-emulated MMU for tests and hosted development.
//!
//! This is the same "scale model" of x86_64 paging that Polaris uses elsewhere:
//! - 16-bit addresses (vs 48-bit on x86_64)
//! - 3 levels of page tables (vs 4 on x86_64)
//! - 4-bit indexes (16 entries per table)
//! - 4-bit page offset (16-byte pages)
//!
//! Unlike real hardware, nothing walks these tables on its own. User accesses are emulated by
//! [`crate::PageDirectory::access`], which performs the permission checks and sets the
//! accessed and dirty bits the way the CPU would.

mod entry;
mod flags;
mod table;

use core::sync::atomic::{AtomicUsize, Ordering};

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::PageTable;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 16;

/// Maximum number of bits in a virtual address.
pub const MAX_VIRTUAL_BITS: usize = 16;

/// Page size in bytes (16 bytes = 2^4).
pub const PAGE_SIZE: usize = 16;

/// Number of page table levels (level 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// First address past the user half of the address space.
pub const USER_SPACE_END: usize = 0x8000;

/// Initial user stack pointer. The first stack page sits just below it.
pub const USER_STACK_TOP: usize = 0x7000;

/// Default maximum size of a user stack (64 pages).
pub const DEFAULT_STACK_LIMIT: usize = 0x400;

/// Returns the page table index for a given virtual address at the specified level.
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "level out of range for software emulation (0-2)");
    (address >> (4 + level * 4)) & 0xF
}

/// Physical addresses must fit within 16 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1usize << MAX_PHYSICAL_BITS)
}

/// Virtual addresses must be sign-extended from bit 15.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Sign-extends bit 15 into bits 16-63.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    if (addr & (1 << (MAX_VIRTUAL_BITS - 1))) != 0 {
        addr | 0xFFFF_FFFF_FFFF_0000
    } else {
        addr & 0xFFFF
    }
}

/// Invalidates any cached translation for `addr`.
///
/// The emulated MMU has no TLB, so this only exists to keep the call sites identical.
#[inline]
pub fn flush(_addr: usize) {}

/// Emulated physical memory.
///
/// A fixed buffer handed out by a bump allocator. Page tables and the user frame pool are both
/// carved from it; nothing is ever returned.
pub struct EmulatedMemory {
    memory: Vec<u8>,
    next_alloc: AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a zeroed emulated memory region of `size` bytes.
    pub fn new(size: usize) -> Self {
        assert!(
            validate_physical(size.saturating_sub(1)),
            "emulated memory exceeds the physical address width"
        );
        Self {
            memory: alloc::vec![0u8; size],
            next_alloc: AtomicUsize::new(0),
        }
    }

    /// Allocates `size` bytes aligned to `align`, returning the physical address.
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        loop {
            let current = self.next_alloc.load(Ordering::Relaxed);
            let aligned = (current + align - 1) & !(align - 1);
            let end = aligned + size;
            if end > self.memory.len() {
                return None;
            }

            if self
                .next_alloc
                .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Translates a physical address to a host pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.memory.len(), "physical address out of bounds");
        // SAFETY: bounds checked above.
        unsafe { self.memory.as_ptr().add(phys) as *mut u8 }
    }

    /// Translates a host pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let base = self.memory.as_ptr() as usize;
        let addr = ptr as usize;
        assert!(
            addr >= base && addr < base + self.memory.len(),
            "pointer not within emulated memory"
        );
        addr - base
    }
}
