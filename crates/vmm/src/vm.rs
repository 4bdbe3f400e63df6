//! The kernel-wide half of virtual memory: user frames and swap, shared by every address space.

use alloc::{boxed::Box, sync::Arc};

use crate::{
    FrameNumber, VmConfig,
    error::VmError,
    frame::{FrameOwner, FramePool, frame_bytes},
    frame_table::FrameTable,
    page::{Page, PageRef},
    page_directory::PageDirectory,
    swap::{Swap, SwapDevice},
};

/// Usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub frames_total: usize,
    pub frames_in_use: usize,
    pub frames_free: usize,
    pub swap_slots: usize,
    pub swap_in_use: usize,
}

/// Frames and swap space shared by all user address spaces.
///
/// Lock order: frame table, then page records (only ever `try_lock`ed while the frame table
/// is held), then page directories, then swap.
pub struct VirtualMemory {
    config: VmConfig,
    frames: spin::Mutex<FrameTable>,
    swap: spin::Mutex<Swap>,
}

impl VirtualMemory {
    pub fn new(config: VmConfig, pool: FramePool, swap: Box<dyn SwapDevice>) -> Self {
        log::debug!(
            "virtual memory: {} user frames, {} swap slots",
            pool.capacity(),
            swap.slot_count()
        );
        Self {
            config,
            frames: spin::Mutex::new(FrameTable::new(pool)),
            swap: spin::Mutex::new(Swap::new(swap)),
        }
    }

    /// Creates an instance whose frames come from emulated memory and whose swap lives in a
    /// [`crate::MemorySwap`], both sized by `config`.
    ///
    /// Returns None if emulated memory cannot hold the frames.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(config: VmConfig) -> Option<Arc<Self>> {
        let pool = FramePool::emulated(config.frame_count)?;
        let swap = crate::MemorySwap::new(config.swap_slots);
        Some(Arc::new(Self::new(config, pool, Box::new(swap))))
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn stats(&self) -> VmStats {
        let (frames_total, frames_in_use, frames_free) = {
            let frames = self.frames.lock();
            (frames.capacity(), frames.in_use(), frames.available())
        };
        let swap = self.swap.lock();
        VmStats {
            frames_total,
            frames_in_use,
            frames_free,
            swap_slots: swap.capacity(),
            swap_in_use: swap.in_use(),
        }
    }

    pub(crate) fn swap(&self) -> spin::MutexGuard<'_, Swap> {
        self.swap.lock()
    }

    /// Returns a frame now owned by `owner`. Never fails; see [`FrameTable::acquire`].
    ///
    /// Must not be called with a page directory or the swap table locked.
    pub(crate) fn acquire_frame(&self, owner: FrameOwner) -> FrameNumber {
        self.frames.lock().acquire(owner, self)
    }

    pub(crate) fn release_frame(&self, number: FrameNumber) {
        self.frames.lock().release(number);
    }

    /// Makes the page in `record` resident, filling its frame through its backing.
    ///
    /// `page` is the locked contents of `record`. Claiming a resident page does nothing.
    pub(crate) fn claim(
        &self,
        record: &PageRef,
        page: &mut Page,
        directory: &Arc<spin::Mutex<PageDirectory>>,
    ) -> Result<(), VmError> {
        self.claim_with(record, page, directory, |page, buf| page.swap_in(self, buf))
    }

    /// Makes `page` resident, filling its new frame with `fill` instead of its backing.
    pub(crate) fn claim_with(
        &self,
        record: &PageRef,
        page: &mut Page,
        directory: &Arc<spin::Mutex<PageDirectory>>,
        fill: impl FnOnce(&mut Page, &mut [u8]) -> Result<(), VmError>,
    ) -> Result<(), VmError> {
        if page.is_resident() {
            return Ok(());
        }

        let va = page.va();
        let frame = self.acquire_frame(FrameOwner::new(record, directory));

        let mapped = directory.lock().map(va, frame.start(), page.writable());
        if let Err(err) = mapped {
            self.release_frame(frame);
            return Err(err.into());
        }
        page.frame = Some(frame);

        // SAFETY: the frame was just linked to `page`, whose lock the caller holds.
        let buf = unsafe { frame_bytes(frame) };
        if let Err(err) = fill(page, buf) {
            directory.lock().unmap(va);
            page.frame = None;
            self.release_frame(frame);
            return Err(err);
        }

        log::trace!("claimed {} in frame {}", va, frame);
        Ok(())
    }
}
