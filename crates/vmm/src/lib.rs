#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! Demand-paged virtual memory for Polaris user processes. It provides:
//!
//! - A per-process supplemental page table describing every user page, resident or not.
//! - Lazy page backings: uninitialized pages that materialize on first touch, anonymous
//!   pages that spill to swap, and file-backed pages that write back to their file.
//! - A kernel-wide frame table with clock eviction.
//! - The page fault resolver, including stack growth.
//! - Memory-mapped files and process image segments.
//! - Software emulation of the MMU for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod config;
mod error;
mod fault;
mod file;
mod frame;
mod frame_table;
mod hash;
mod mmap;
mod numbers;
mod page;
mod page_directory;
mod spt;
mod swap;
mod vm;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use config::VmConfig;
pub use error::{FileError, MapError, SwapError, VmError};
pub use fault::{FAULT_EXIT_STATUS, PageFault};
pub use file::{File, MemoryFile};
pub use frame::{Frame, FrameOwner, FramePool};
pub use frame_table::FrameTable;
pub use hash::{Cursor, IndexedMap, Keying, Occupied, hash_bytes, hash_usize};
pub use mmap::{FileExtent, RegionKind};
pub use numbers::{FrameNumber, PageNumber};
pub use page::{
    AnonPage, Backing, FilePage, Loader, Page, PageKind, PageRecord, PageRef, Region, UninitPage,
};
pub use page_directory::{Access, AccessFault, PageDirectory};
pub use spt::SupplementalPageTable;
pub use swap::{MemorySwap, Swap, SwapDevice, SwapSlot};
pub use vm::{VirtualMemory, VmStats};

pub use arch::{PAGE_SIZE, USER_SPACE_END, USER_STACK_TOP};
