//! Anonymous pages.
//!
//! Anonymous memory has no home besides its frame, so a page whose contents cannot be
//! recreated goes to swap when evicted. Pages that are still zero-filled, or still hold exactly
//! what their loader produced, are simply dropped and recreated on the next fault.

use super::{Backing, Loader, Page, PageKind, PageOperations};
use crate::{
    error::VmError, frame::frame_bytes, page_directory::PageDirectory, swap::SwapSlot,
    vm::VirtualMemory,
};

pub(super) static OPERATIONS: PageOperations = PageOperations {
    kind: PageKind::Anon,
    swap_in,
    swap_out,
    destroy,
};

/// How to recreate an anonymous page that is not in swap.
#[derive(Clone)]
pub(crate) enum AnonContents {
    /// All zeroes.
    Zero,
    /// Whatever the loader produces, such as a process image segment.
    Lazy(Loader),
    /// Modified at some point; only swap has a copy once evicted.
    Private,
}

/// Payload of an anonymous page.
#[derive(Clone)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
    contents: AnonContents,
}

impl AnonPage {
    pub(crate) fn zeroed() -> Self {
        Self {
            slot: None,
            contents: AnonContents::Zero,
        }
    }

    pub(crate) fn lazy(loader: Loader) -> Self {
        Self {
            slot: None,
            contents: AnonContents::Lazy(loader),
        }
    }

    /// The swap slot holding this page while it is evicted.
    pub fn slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    /// Returns true once the page's contents can only be recovered from its frame or swap.
    pub fn is_private(&self) -> bool {
        matches!(self.contents, AnonContents::Private)
    }

    /// Copies the payload without its swap slot.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            slot: None,
            contents: self.contents.clone(),
        }
    }
}

fn anon_mut(page: &mut Page) -> &mut AnonPage {
    let kind = page.operations().kind;
    match &mut page.backing {
        Backing::Anon(anon) => anon,
        _ => panic!("anonymous page operation on {:?}", kind),
    }
}

fn swap_in(page: &mut Page, vm: &VirtualMemory, buf: &mut [u8]) -> Result<(), VmError> {
    let va = page.va();
    let anon = anon_mut(page);

    if let Some(slot) = anon.slot {
        let mut swap = vm.swap();
        swap.read(slot, buf)?;
        swap.free(slot)?;
        anon.slot = None;
        log::trace!("swapped in {} from slot {}", va, slot);
        return Ok(());
    }

    match &anon.contents {
        AnonContents::Lazy(loader) => loader(buf),
        AnonContents::Zero | AnonContents::Private => {
            buf.fill(0);
            Ok(())
        }
    }
}

fn swap_out(page: &mut Page, vm: &VirtualMemory, directory: &mut PageDirectory) -> Result<(), VmError> {
    let va = page.va();
    let Some(frame) = page.frame else {
        return Ok(());
    };
    let dirty = directory.is_dirty(va);
    let anon = anon_mut(page);

    if !dirty && !anon.is_private() {
        log::trace!("discarding clean page {}", va);
        return Ok(());
    }

    let mut swap = vm.swap();
    let slot = swap.allocate()?;
    // SAFETY: the evictor holds this page's lock and the frame is still linked to it.
    let bytes = unsafe { frame_bytes(frame) };
    if let Err(err) = swap.write(slot, bytes) {
        swap.free(slot)?;
        return Err(err.into());
    }

    anon.slot = Some(slot);
    anon.contents = AnonContents::Private;
    log::trace!("swapped out {} to slot {}", va, slot);
    Ok(())
}

fn destroy(page: &mut Page, vm: &VirtualMemory, _directory: &spin::Mutex<PageDirectory>) {
    let va = page.va();
    if let Some(slot) = anon_mut(page).slot.take() {
        if let Err(err) = vm.swap().free(slot) {
            log::warn!("failed to release swap slot {} of {}: {}", slot, va, err);
        }
    }
}
