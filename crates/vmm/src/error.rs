//! Error types.
//!
//! `VmError` is what the fault resolver and the region manager report. An `Err` from a fault
//! means the faulting process must be terminated; conditions the kernel cannot recover from
//! panic instead of returning.

use thiserror::Error;

use crate::{VirtualAddress, swap::SwapSlot};

/// Failures installing a hardware mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("page is already mapped")]
    AlreadyMapped,
    #[error("out of memory for page tables")]
    OutOfMemory,
}

/// Failures reported by a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FileError {
    #[error("offset {offset:#x} is past the end of the file")]
    OutOfRange { offset: usize },
    #[error("file could not be reopened")]
    Reopen,
    #[error("I/O error")]
    Io,
}

/// Failures reported by the swap table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("swap space exhausted")]
    Full,
    #[error("swap slot {0} is not allocated")]
    InvalidSlot(SwapSlot),
    #[error("swap device error")]
    Device,
}

/// Errors from virtual memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("a page already exists at {0}")]
    AlreadyMapped(VirtualAddress),
    #[error("no page exists at {0}")]
    NotMapped(VirtualAddress),
    #[error("invalid access to {0:#x}")]
    InvalidAccess(usize),
    #[error("protection violation at {0}")]
    ProtectionViolation(VirtualAddress),
    #[error("write to read-only page at {0}")]
    ReadOnly(VirtualAddress),
    #[error("address or offset is not page-aligned")]
    Misaligned,
    #[error("invalid length")]
    InvalidLength,
    #[error("file error: {0}")]
    File(#[from] FileError),
    #[error("swap error: {0}")]
    Swap(#[from] SwapError),
    #[error("mapping error: {0}")]
    Map(#[from] MapError),
}
