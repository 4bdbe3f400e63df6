//! Swap space.
//!
//! The swap device is an opaque array of page-sized slots. [`Swap`] tracks which slots hold
//! evicted pages with a bitmap and moves page contents to and from the device.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::fmt;

use crate::{arch::PAGE_SIZE, error::SwapError};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Index of a page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A block device holding page-sized slots.
pub trait SwapDevice: Send + Sync {
    /// Number of slots on the device.
    fn slot_count(&self) -> usize;

    /// Reads slot `slot` into `buf`, which is exactly one page long.
    fn read_slot(&self, slot: usize, buf: &mut [u8]) -> Result<(), SwapError>;

    /// Writes `buf`, which is exactly one page long, to slot `slot`.
    fn write_slot(&self, slot: usize, buf: &[u8]) -> Result<(), SwapError>;
}

/// Slot allocator over a swap device.
pub struct Swap {
    device: Box<dyn SwapDevice>,
    bitmap: Vec<u64>,
    in_use: usize,
}

impl Swap {
    /// Creates a swap table with every slot of `device` free.
    pub fn new(device: Box<dyn SwapDevice>) -> Self {
        let words = device.slot_count().div_ceil(BITS_PER_WORD);
        Self {
            device,
            bitmap: alloc::vec![0; words],
            in_use: 0,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.device.slot_count()
    }

    /// Number of slots currently holding a page.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Reserves a free slot.
    pub fn allocate(&mut self) -> Result<SwapSlot, SwapError> {
        let capacity = self.capacity();
        for (word_index, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let index = word_index * BITS_PER_WORD + bit;
            if index >= capacity {
                break;
            }
            *word |= 1 << bit;
            self.in_use += 1;
            return Ok(SwapSlot(index));
        }
        Err(SwapError::Full)
    }

    /// Returns `slot` to the free pool.
    pub fn free(&mut self, slot: SwapSlot) -> Result<(), SwapError> {
        let (word, mask) = self.locate(slot)?;
        self.bitmap[word] &= !mask;
        self.in_use -= 1;
        Ok(())
    }

    /// Reads the page stored in `slot`.
    pub fn read(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<(), SwapError> {
        self.locate(slot)?;
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.device.read_slot(slot.0, buf)
    }

    /// Stores a page in `slot`.
    pub fn write(&self, slot: SwapSlot, buf: &[u8]) -> Result<(), SwapError> {
        self.locate(slot)?;
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.device.write_slot(slot.0, buf)
    }

    /// Returns the bitmap word and bit of an allocated slot.
    fn locate(&self, slot: SwapSlot) -> Result<(usize, u64), SwapError> {
        if slot.0 >= self.capacity() {
            return Err(SwapError::InvalidSlot(slot));
        }
        let word = slot.0 / BITS_PER_WORD;
        let mask = 1 << (slot.0 % BITS_PER_WORD);
        if self.bitmap[word] & mask == 0 {
            return Err(SwapError::InvalidSlot(slot));
        }
        Ok((word, mask))
    }
}

/// Swap device kept in kernel memory.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct MemorySwap {
    slots: usize,
    data: Arc<spin::Mutex<Vec<u8>>>,
}

impl MemorySwap {
    /// Creates a zeroed device with `slots` slots.
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            data: Arc::new(spin::Mutex::new(alloc::vec![0; slots * PAGE_SIZE])),
        }
    }

    fn range(&self, slot: usize, len: usize) -> Result<core::ops::Range<usize>, SwapError> {
        if slot >= self.slots || len != PAGE_SIZE {
            return Err(SwapError::Device);
        }
        let start = slot * PAGE_SIZE;
        Ok(start..start + PAGE_SIZE)
    }
}

impl SwapDevice for MemorySwap {
    fn slot_count(&self) -> usize {
        self.slots
    }

    fn read_slot(&self, slot: usize, buf: &mut [u8]) -> Result<(), SwapError> {
        let range = self.range(slot, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_slot(&self, slot: usize, buf: &[u8]) -> Result<(), SwapError> {
        let range = self.range(slot, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(slots: usize) -> Swap {
        Swap::new(Box::new(MemorySwap::new(slots)))
    }

    #[test]
    fn allocate_hands_out_distinct_slots() {
        let mut swap = swap(3);
        let a = swap.allocate().unwrap();
        let b = swap.allocate().unwrap();
        let c = swap.allocate().unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(swap.in_use(), 3);
        assert_eq!(swap.allocate(), Err(SwapError::Full));
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut swap = swap(2);
        let a = swap.allocate().unwrap();
        let _b = swap.allocate().unwrap();

        swap.free(a).unwrap();
        assert_eq!(swap.in_use(), 1);
        assert_eq!(swap.allocate(), Ok(a));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut swap = swap(2);
        let a = swap.allocate().unwrap();
        swap.free(a).unwrap();
        assert_eq!(swap.free(a), Err(SwapError::InvalidSlot(a)));
    }

    #[test]
    fn capacity_not_multiple_of_word() {
        let mut swap = swap(BITS_PER_WORD + 1);
        for _ in 0..=BITS_PER_WORD {
            swap.allocate().unwrap();
        }
        assert_eq!(swap.allocate(), Err(SwapError::Full));
    }

    #[test]
    fn write_then_read_slot() {
        let mut swap = swap(4);
        let slot = swap.allocate().unwrap();
        let page: Vec<u8> = (0..PAGE_SIZE as u8).collect();

        swap.write(slot, &page).unwrap();

        let mut back = alloc::vec![0; PAGE_SIZE];
        swap.read(slot, &mut back).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn io_on_free_slot_fails() {
        let swap = swap(4);
        let mut buf = alloc::vec![0; PAGE_SIZE];
        assert_eq!(
            swap.read(SwapSlot::new(1), &mut buf),
            Err(SwapError::InvalidSlot(SwapSlot::new(1)))
        );
    }
}
