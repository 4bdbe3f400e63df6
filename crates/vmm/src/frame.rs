use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use core::fmt;

use crate::{
    FrameNumber, PhysicalAddress, VirtualAddress, arch::PAGE_SIZE, page::PageRecord,
    page_directory::PageDirectory,
};

/// The page currently resident in a frame.
///
/// Both handles are weak: a frame never keeps its owner alive. The page record holds the
/// frame number in turn, so each side can find the other.
#[derive(Clone)]
pub struct FrameOwner {
    pub(crate) page: Weak<PageRecord>,
    pub(crate) directory: Weak<spin::Mutex<PageDirectory>>,
}

impl FrameOwner {
    pub fn new(page: &Arc<PageRecord>, directory: &Arc<spin::Mutex<PageDirectory>>) -> Self {
        Self {
            page: Arc::downgrade(page),
            directory: Arc::downgrade(directory),
        }
    }
}

/// A user frame in use.
pub struct Frame {
    number: FrameNumber,
    owner: FrameOwner,
}

impl Frame {
    pub(crate) fn new(number: FrameNumber, owner: FrameOwner) -> Self {
        Self { number, owner }
    }

    pub fn number(&self) -> FrameNumber {
        self.number
    }

    /// The kernel address through which the frame's contents are read and written.
    pub fn kernel_address(&self) -> VirtualAddress {
        VirtualAddress::direct_mapped(self.number.start())
    }

    pub fn owner(&self) -> &FrameOwner {
        &self.owner
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.number)
            .field("owner", &self.owner.page.upgrade().map(|page| page.va()))
            .finish()
    }
}

/// Returns the contents of frame `number`.
///
/// # Safety
/// The frame must be allocated, and the caller must hold the lock of the page that owns it so
/// no one else reads or writes the frame for the lifetime of the slice.
pub(crate) unsafe fn frame_bytes<'a>(number: FrameNumber) -> &'a mut [u8] {
    let virt = VirtualAddress::direct_mapped(number.start());
    // SAFETY: upheld by the caller; frames are exactly one page long.
    unsafe { core::slice::from_raw_parts_mut(virt.as_mut_ptr::<u8>(), PAGE_SIZE) }
}

/// The pool of frames available to user pages.
///
/// Frames `[current, end)` have never been handed out; returned frames are kept on a stack and
/// reused first.
pub struct FramePool {
    start: usize,
    current: usize,
    end: usize,
    recycled: Vec<usize>,
}

impl FramePool {
    /// Creates a pool of `count` frames starting at `base`.
    ///
    /// # Panics
    /// Panics if `base` is not page-aligned.
    pub fn new(base: PhysicalAddress, count: usize) -> Self {
        assert!(base.is_aligned(PAGE_SIZE), "frame pool base must be page-aligned");
        let start = base.frame_number().as_usize();
        Self {
            start,
            current: start,
            end: start + count,
            recycled: Vec::new(),
        }
    }

    /// Carves a pool of `count` frames out of emulated memory.
    ///
    /// Returns None if emulated memory cannot hold that many frames.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(count: usize) -> Option<Self> {
        let base = crate::AddressTranslator::current().allocate(count * PAGE_SIZE, PAGE_SIZE)?;
        Some(Self::new(PhysicalAddress::new(base), count))
    }

    /// Total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Number of frames available for allocation.
    pub fn available(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }

    /// Takes a frame from the pool.
    pub fn allocate(&mut self) -> Option<FrameNumber> {
        if let Some(number) = self.recycled.pop() {
            Some(FrameNumber::new(number))
        } else if self.current == self.end {
            None
        } else {
            self.current += 1;
            Some(FrameNumber::new(self.current - 1))
        }
    }

    /// Returns a frame to the pool.
    ///
    /// # Panics
    /// Panics if the frame was not allocated from this pool or is already free.
    pub fn free(&mut self, number: FrameNumber) {
        let number = number.as_usize();
        if number < self.start || number >= self.current || self.recycled.contains(&number) {
            panic!("frame {number:#x} has not been allocated");
        }
        self.recycled.push(number);
    }
}
