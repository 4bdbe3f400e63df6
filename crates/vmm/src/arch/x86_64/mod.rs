//! x86_64 hardware MMU backend.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::PageTable;

/// Conservative physical address width.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Virtual address width with 4-level paging.
pub const MAX_VIRTUAL_BITS: usize = 48;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels (PML4, PDPT, PD, PT).
pub const PAGE_TABLE_LEVELS: usize = 4;

/// First address past the canonical lower half, which belongs to user space.
pub const USER_SPACE_END: usize = 0x0000_8000_0000_0000;

/// Initial user stack pointer.
pub const USER_STACK_TOP: usize = 0x4748_0000;

/// Default maximum size of a user stack (1 MiB).
pub const DEFAULT_STACK_LIMIT: usize = 1 << 20;

/// Returns the page table index for a given virtual address at the specified level.
///
/// Level 0 is the PT, level 3 the PML4. Each level consumes 9 bits.
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "level out of range for x86_64 page table levels");
    (address >> (12 + level * 9)) & 0x1FF
}

/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1usize << MAX_PHYSICAL_BITS)
}

/// Virtual addresses must be sign-extended from bit 47.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Sign-extends bit 47 into bits 48-63.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    if (addr & (1 << (MAX_VIRTUAL_BITS - 1))) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    }
}

/// Drops the TLB entry for `addr` after its mapping or accessed/dirty bits change.
#[inline]
pub fn flush(addr: usize) {
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new_truncate(addr as u64));
}
