//! Page records and their backings.
//!
//! Every user page a process knows about has a [`PageRecord`], whether or not it is resident.
//! What happens when the page is brought in, evicted or torn down depends on its [`Backing`]:
//!
//! - [`UninitPage`]: never touched yet. The first claim turns it into its target kind.
//! - [`AnonPage`]: anonymous memory, spilled to swap when evicted.
//! - [`FilePage`]: a window onto a file, written back when evicted dirty.
//!
//! Each kind supplies a static [`PageOperations`] table, selected from the active variant.

mod anon;
mod file;
mod uninit;

use alloc::sync::Arc;
use core::fmt;

use crate::{
    FrameNumber, VirtualAddress, arch, error::VmError, page_directory::PageDirectory,
    vm::VirtualMemory,
};

pub use anon::AnonPage;
pub use file::{FilePage, Region};
pub use uninit::UninitPage;

/// Fills a freshly claimed frame with a page's initial contents.
///
/// Loaders are shared so a forked page can run the same initialization.
pub type Loader = Arc<dyn Fn(&mut [u8]) -> Result<(), VmError> + Send + Sync>;

/// The kinds of page backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Uninit,
    Anon,
    File,
}

/// Kind-specific behavior of a page.
pub(crate) struct PageOperations {
    pub kind: PageKind,
    /// Fills the page's frame, passed as `buf`, with its contents.
    pub swap_in: fn(&mut Page, &VirtualMemory, &mut [u8]) -> Result<(), VmError>,
    /// Persists the contents of a resident page so its frame can be reused.
    pub swap_out: fn(&mut Page, &VirtualMemory, &mut PageDirectory) -> Result<(), VmError>,
    /// Releases kind-specific resources. Writes back dirty file contents.
    pub destroy: fn(&mut Page, &VirtualMemory, &spin::Mutex<PageDirectory>),
}

/// The active backing of a page.
#[derive(Clone)]
pub enum Backing {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

/// A virtual page of a user process.
pub struct Page {
    va: VirtualAddress,
    writable: bool,
    pub(crate) frame: Option<FrameNumber>,
    pub(crate) backing: Backing,
}

impl Page {
    /// Creates a non-resident page.
    ///
    /// # Panics
    /// Panics if `va` is not page-aligned.
    pub(crate) fn new(va: VirtualAddress, writable: bool, backing: Backing) -> Self {
        assert!(va.is_aligned(arch::PAGE_SIZE), "page address must be page-aligned");
        Self {
            va,
            writable,
            frame: None,
            backing,
        }
    }

    /// Creates a zero-filled anonymous page.
    pub(crate) fn anon(va: VirtualAddress, writable: bool) -> Self {
        Self::new(va, writable, Backing::Anon(AnonPage::zeroed()))
    }

    pub fn va(&self) -> VirtualAddress {
        self.va
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// The frame holding this page, if it is resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// The kind this page is, or will become once first claimed.
    pub fn kind(&self) -> PageKind {
        match &self.backing {
            Backing::Uninit(uninit) => uninit.target(),
            _ => self.operations().kind,
        }
    }

    /// Returns true until the page has been claimed for the first time.
    pub fn is_uninit(&self) -> bool {
        self.operations().kind == PageKind::Uninit
    }

    /// The memory mapping this page belongs to, if any.
    pub fn region(&self) -> Option<Region> {
        match &self.backing {
            Backing::Uninit(uninit) => uninit.region(),
            Backing::File(file) => Some(file.region()),
            Backing::Anon(_) => None,
        }
    }

    pub(crate) fn operations(&self) -> &'static PageOperations {
        match self.backing {
            Backing::Uninit(_) => &uninit::OPERATIONS,
            Backing::Anon(_) => &anon::OPERATIONS,
            Backing::File(_) => &file::OPERATIONS,
        }
    }

    /// Fills `buf`, the frame just linked to this page, with the page's contents.
    pub(crate) fn swap_in(&mut self, vm: &VirtualMemory, buf: &mut [u8]) -> Result<(), VmError> {
        (self.operations().swap_in)(self, vm, buf)
    }

    /// Saves the contents of this resident page, unmaps it and detaches it from its frame.
    ///
    /// The frame itself is left for the caller to reuse.
    pub(crate) fn swap_out(
        &mut self,
        vm: &VirtualMemory,
        directory: &mut PageDirectory,
    ) -> Result<(), VmError> {
        (self.operations().swap_out)(self, vm, directory)?;
        directory.unmap(self.va);
        self.frame = None;
        Ok(())
    }

    /// Releases everything this page holds: its swap slot, its mapping and its frame.
    ///
    /// Dirty file-backed contents are written back first.
    pub(crate) fn destroy(&mut self, vm: &VirtualMemory, directory: &spin::Mutex<PageDirectory>) {
        (self.operations().destroy)(self, vm, directory);
        if let Some(frame) = self.frame.take() {
            directory.lock().unmap(self.va);
            vm.release_frame(frame);
        }
    }

    /// Returns a non-resident copy of this page for another address space.
    ///
    /// Swap slots are never shared; the caller copies resident contents itself.
    pub(crate) fn duplicate(&self) -> Page {
        let backing = match &self.backing {
            Backing::Anon(anon) => Backing::Anon(anon.duplicate()),
            other => other.clone(),
        };
        Page::new(self.va, self.writable, backing)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("va", &self.va)
            .field("kind", &self.operations().kind)
            .field("writable", &self.writable)
            .field("frame", &self.frame)
            .finish()
    }
}

/// A page record shared between the page table that owns it and the frame it occupies.
pub struct PageRecord {
    va: VirtualAddress,
    page: spin::Mutex<Page>,
}

/// Shared handle to a page record.
pub type PageRef = Arc<PageRecord>;

impl PageRecord {
    pub fn new(page: Page) -> PageRef {
        Arc::new(Self {
            va: page.va,
            page: spin::Mutex::new(page),
        })
    }

    /// The page-aligned address of the page. Never changes.
    pub fn va(&self) -> VirtualAddress {
        self.va
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, Page> {
        self.page.lock()
    }

    pub fn try_lock(&self) -> Option<spin::MutexGuard<'_, Page>> {
        self.page.try_lock()
    }
}

impl fmt::Debug for PageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageRecord({})", self.va)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninit_page_reports_target_kind() {
        let va = VirtualAddress::new(0x100);
        let page = Page::new(va, true, Backing::Uninit(UninitPage::anon(None)));

        assert!(page.is_uninit());
        assert_eq!(page.kind(), PageKind::Anon);
        assert!(!page.is_resident());
        assert_eq!(page.region(), None);
    }

    #[test]
    fn anon_page_kind() {
        let page = Page::anon(VirtualAddress::new(0x200), false);
        assert!(!page.is_uninit());
        assert_eq!(page.kind(), PageKind::Anon);
        assert!(!page.writable());
    }

    #[test]
    #[should_panic(expected = "page-aligned")]
    fn unaligned_page_is_rejected() {
        let _ = Page::anon(VirtualAddress::new(0x201), true);
    }

    #[test]
    fn record_exposes_address() {
        let record = PageRecord::new(Page::anon(VirtualAddress::new(0x300), true));
        assert_eq!(record.va(), VirtualAddress::new(0x300));
        assert_eq!(record.lock().va(), record.va());

        let guard = record.lock();
        assert!(record.try_lock().is_none());
        drop(guard);
        assert!(record.try_lock().is_some());
    }
}
