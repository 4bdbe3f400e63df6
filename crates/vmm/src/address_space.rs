//! User address spaces.
//!
//! An `AddressSpace` pairs a process's hardware page directory with its supplemental page
//! table, and borrows frames and swap from the shared [`VirtualMemory`]. The fault resolver
//! (`fault.rs`) and the region manager (`mmap.rs`) add their operations to it.

use alloc::sync::Arc;

use crate::{
    VirtualAddress,
    error::VmError,
    frame::frame_bytes,
    page::{Backing, Loader, Page, PageRecord, PageRef, UninitPage},
    page_directory::PageDirectory,
    spt::SupplementalPageTable,
    vm::VirtualMemory,
};

/// The user half of a process's address space.
pub struct AddressSpace {
    pub(crate) vm: Arc<VirtualMemory>,
    pub(crate) directory: Arc<spin::Mutex<PageDirectory>>,
    pub(crate) spt: SupplementalPageTable,
    /// User stack pointer used for faults raised by emulated accesses.
    #[cfg(any(test, feature = "software-emulation"))]
    pub(crate) stack_pointer: usize,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new(vm: Arc<VirtualMemory>) -> Self {
        log::debug!("creating address space");
        Self {
            vm,
            directory: Arc::new(spin::Mutex::new(PageDirectory::new())),
            spt: SupplementalPageTable::new(),
            #[cfg(any(test, feature = "software-emulation"))]
            stack_pointer: crate::arch::USER_STACK_TOP,
        }
    }

    pub fn vm(&self) -> &Arc<VirtualMemory> {
        &self.vm
    }

    pub fn pages(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// Finds the page containing `va`.
    pub fn find_page(&self, va: VirtualAddress) -> Option<PageRef> {
        self.spt.find(va)
    }

    /// Registers an uninitialized anonymous page at `va`, filled by `loader` (or zeroed) when
    /// first touched.
    ///
    /// Fails if a page already exists there.
    pub fn alloc_page(
        &mut self,
        va: VirtualAddress,
        writable: bool,
        loader: Option<Loader>,
    ) -> Result<(), VmError> {
        if !va.is_aligned(crate::arch::PAGE_SIZE) {
            return Err(VmError::Misaligned);
        }
        let page = Page::new(va, writable, Backing::Uninit(UninitPage::anon(loader)));
        self.insert_page(page)?;
        Ok(())
    }

    pub(crate) fn insert_page(&mut self, page: Page) -> Result<PageRef, VmError> {
        let record = PageRecord::new(page);
        self.spt.insert(Arc::clone(&record))?;
        Ok(record)
    }

    /// Makes the page containing `va` resident.
    pub fn claim(&mut self, va: VirtualAddress) -> Result<(), VmError> {
        let record = self.spt.find(va).ok_or(VmError::NotMapped(va))?;
        let mut page = record.lock();
        self.vm.claim(&record, &mut page, &self.directory)
    }

    /// Removes the page containing `va`, writing back and releasing whatever it holds.
    pub fn remove_page(&mut self, va: VirtualAddress) -> Result<(), VmError> {
        self.spt.remove(va, &self.vm, &self.directory)
    }

    /// Creates a copy of this address space for a child process.
    pub fn fork(&self) -> Result<AddressSpace, VmError> {
        let mut child = AddressSpace::new(Arc::clone(&self.vm));
        child.copy_from(self)?;
        Ok(child)
    }

    /// Copies every page of `src` into this address space.
    ///
    /// Resident pages get a fresh frame holding a copy of their contents; nothing is shared
    /// copy-on-write. Pages that have never been touched are copied lazily. On failure every
    /// page copied so far is released again.
    pub fn copy_from(&mut self, src: &AddressSpace) -> Result<(), VmError> {
        let result = self.copy_pages(src);
        if let Err(err) = &result {
            log::warn!("address space copy failed: {}", err);
            self.destroy_all();
        }
        result
    }

    fn copy_pages(&mut self, src: &AddressSpace) -> Result<(), VmError> {
        for src_record in src.spt.records() {
            let mut src_page = src_record.lock();
            let va = src_page.va();
            let record = self.insert_page(src_page.duplicate())?;
            if src_page.is_uninit() {
                continue;
            }

            // Swapped out pages come back in first; holding the lock keeps them resident.
            self.vm.claim(&src_record, &mut src_page, &src.directory)?;
            let src_frame = src_page.frame().ok_or(VmError::NotMapped(va))?;
            let dirty = src.directory.lock().is_dirty(va);

            let mut page = record.lock();
            self.vm.claim_with(&record, &mut page, &self.directory, |_, buf| {
                // SAFETY: the source page is locked and resident.
                buf.copy_from_slice(unsafe { frame_bytes(src_frame) });
                Ok(())
            })?;
            if dirty {
                self.directory.lock().set_dirty(va, true);
            }
        }
        Ok(())
    }

    /// Releases every page: dirty file contents are written back, swap slots and frames are
    /// freed.
    pub fn destroy_all(&mut self) {
        if self.spt.is_empty() {
            return;
        }
        log::debug!("destroying {} pages", self.spt.len());
        self.spt.destroy_all(&self.vm, &self.directory);
    }

    /// Switches the MMU to this address space.
    ///
    /// # Safety
    /// The kernel must remain mapped in this address space's page tables.
    pub unsafe fn activate(&self) {
        // SAFETY: upheld by the caller.
        unsafe { self.directory.lock().activate() }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

/// Emulated user accesses.
///
/// These behave like user-mode loads and stores: missing pages raise faults that go through
/// the resolver, and the accessed and dirty bits are updated as the MMU would.
#[cfg(any(test, feature = "software-emulation"))]
impl AddressSpace {
    /// Sets the user stack pointer reported with emulated faults.
    pub fn set_stack_pointer(&mut self, stack_pointer: usize) {
        self.stack_pointer = stack_pointer;
    }

    /// Reads `buf.len()` bytes of user memory at `addr`.
    pub fn read_user(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), VmError> {
        for (i, byte) in buf.iter_mut().enumerate() {
            let ptr = self.user_byte(addr + i, crate::Access::Read)?;
            // SAFETY: `ptr` points into the frame mapped at `addr + i`.
            *byte = unsafe { ptr.read() };
        }
        Ok(())
    }

    /// Writes `bytes` to user memory at `addr`.
    pub fn write_user(&mut self, addr: usize, bytes: &[u8]) -> Result<(), VmError> {
        for (i, byte) in bytes.iter().enumerate() {
            let ptr = self.user_byte(addr + i, crate::Access::Write)?;
            // SAFETY: `ptr` points into the frame mapped at `addr + i`.
            unsafe { ptr.write(*byte) };
        }
        Ok(())
    }

    /// Translates one user byte, faulting it in if needed.
    fn user_byte(&mut self, addr: usize, access: crate::Access) -> Result<*mut u8, VmError> {
        const MAX_ATTEMPTS: usize = 3;

        let va = VirtualAddress::try_new(addr).ok_or(VmError::InvalidAccess(addr))?;
        for _ in 0..MAX_ATTEMPTS {
            let result = self.directory.lock().access(va, access);
            match result {
                Ok(phys) => {
                    let translator = crate::AddressTranslator::current();
                    return Ok(translator.phys_to_ptr::<u8>(phys.as_usize()));
                }
                Err(fault) => self.fault(crate::PageFault {
                    address: addr,
                    is_user: true,
                    is_write: fault.write,
                    is_present: fault.present,
                    stack_pointer: self.stack_pointer,
                })?,
            }
        }
        Err(VmError::InvalidAccess(addr))
    }
}
