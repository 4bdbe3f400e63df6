//! Kernel-wide table of user frames.
//!
//! Frames come from the [`FramePool`] while it lasts. After that a victim is chosen with the
//! clock algorithm: the hand sweeps the frames in order, giving every recently referenced page
//! a second chance by clearing its accessed bit. Pages whose lock is held (being claimed,
//! copied or destroyed) are passed over.
//!
//! The table lock is the eviction lock. While holding it, page records may only be
//! `try_lock`ed, which is what lets a thread holding a page lock allocate a frame.

use alloc::{collections::BTreeMap, vec::Vec};
use core::ops::Bound;

use crate::{
    FrameNumber,
    frame::{Frame, FrameOwner, FramePool},
    vm::VirtualMemory,
};

/// How many times the hand may go around before giving up.
///
/// The first lap can clear every accessed bit; the second must then find a victim unless
/// every page is locked.
const MAX_SWEEPS: usize = 3;

pub struct FrameTable {
    pool: FramePool,
    frames: BTreeMap<FrameNumber, Frame>,
    hand: Option<FrameNumber>,
}

impl FrameTable {
    pub fn new(pool: FramePool) -> Self {
        Self {
            pool,
            frames: BTreeMap::new(),
            hand: None,
        }
    }

    /// Number of frames holding a page.
    pub fn in_use(&self) -> usize {
        self.frames.len()
    }

    /// Number of frames that can be handed out without evicting.
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Total number of user frames.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Hands out a frame for `owner`, evicting another page if the pool is empty.
    ///
    /// # Panics
    /// Panics if no page can be evicted, or if evicting the chosen victim fails.
    pub(crate) fn acquire(&mut self, owner: FrameOwner, vm: &VirtualMemory) -> FrameNumber {
        let number = match self.pool.allocate() {
            Some(number) => number,
            None => self.evict(vm),
        };
        self.frames.insert(number, Frame::new(number, owner));
        number
    }

    /// Returns `number` to the pool.
    pub(crate) fn release(&mut self, number: FrameNumber) {
        if self.frames.remove(&number).is_some() {
            self.pool.free(number);
        }
    }

    /// Frame numbers in the order the clock hand visits them, starting after the hand.
    fn clock_order(&self) -> Vec<FrameNumber> {
        let Some(hand) = self.hand else {
            return self.frames.keys().copied().collect();
        };
        self.frames
            .range((Bound::Excluded(hand), Bound::Unbounded))
            .chain(self.frames.range(..=hand))
            .map(|(number, _)| *number)
            .collect()
    }

    /// Frees the frame of a victim page and returns it, detached from any owner.
    fn evict(&mut self, vm: &VirtualMemory) -> FrameNumber {
        for _ in 0..MAX_SWEEPS {
            for number in self.clock_order() {
                let Some(frame) = self.frames.get(&number) else {
                    continue;
                };
                let owner = frame.owner();
                let (Some(record), Some(directory)) =
                    (owner.page.upgrade(), owner.directory.upgrade())
                else {
                    log::warn!("reclaiming orphaned frame {}", number);
                    self.frames.remove(&number);
                    return number;
                };

                let Some(mut page) = record.try_lock() else {
                    continue;
                };
                if page.frame() != Some(number) {
                    continue;
                }

                let mut directory = directory.lock();
                if directory.is_accessed(page.va()) {
                    directory.set_accessed(page.va(), false);
                    continue;
                }

                self.hand = Some(number);
                log::debug!(
                    "evicting {} from frame {} ({})",
                    page.va(),
                    number,
                    frame.kernel_address()
                );
                if let Err(err) = page.swap_out(vm, &mut directory) {
                    log::error!("failed to evict {}: {}", page.va(), err);
                    panic!("eviction of {} failed: {}", page.va(), err);
                }
                self.frames.remove(&number);
                return number;
            }
        }

        log::error!("no evictable frame among {} in use", self.frames.len());
        panic!("out of user frames");
    }
}
