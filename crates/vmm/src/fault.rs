//! Page fault resolution.

use crate::{
    AddressSpace, VirtualAddress,
    arch::{PAGE_SIZE, USER_STACK_TOP},
    error::VmError,
    page::Page,
};

/// Exit status of a process killed by an unresolvable fault.
pub const FAULT_EXIT_STATUS: i32 = -1;

/// A page fault as reported by the trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// The faulting address, exactly as the CPU reported it.
    pub address: usize,
    /// The fault was raised in user mode.
    pub is_user: bool,
    /// The access was a write.
    pub is_write: bool,
    /// The page was mapped, so the fault is a protection violation.
    pub is_present: bool,
    /// The user stack pointer at the time of the fault. For faults taken in kernel mode this
    /// is the value saved on entry from user mode.
    pub stack_pointer: usize,
}

impl AddressSpace {
    /// Resolves a page fault.
    ///
    /// On success the faulting access can be restarted. An error means the access was
    /// illegal, and the process must be terminated with [`FAULT_EXIT_STATUS`].
    ///
    /// # Panics
    /// Panics if a frame is needed and no page can be evicted.
    pub fn fault(&mut self, fault: PageFault) -> Result<(), VmError> {
        log::trace!("page fault: {:?}", fault);
        let result = self.resolve(fault);
        if let Err(err) = &result {
            log::warn!(
                "{} fault at {:#x} not resolved: {}",
                if fault.is_user { "user" } else { "kernel" },
                fault.address,
                err
            );
        }
        result
    }

    fn resolve(&mut self, fault: PageFault) -> Result<(), VmError> {
        let va = VirtualAddress::try_new(fault.address)
            .filter(|va| va.is_user() && va.as_usize() >= PAGE_SIZE)
            .ok_or(VmError::InvalidAccess(fault.address))?;

        if fault.is_present {
            return Err(VmError::ProtectionViolation(va));
        }

        if let Some(record) = self.spt.find(va) {
            let mut page = record.lock();
            if fault.is_write && !page.writable() {
                return Err(VmError::ReadOnly(va));
            }
            return self.vm.claim(&record, &mut page, &self.directory);
        }

        if self.is_stack_access(va, fault.stack_pointer) {
            return self.grow_stack(va);
        }

        Err(VmError::NotMapped(va))
    }

    /// Returns true if an access to `va` looks like a push onto the stack.
    fn is_stack_access(&self, va: VirtualAddress, stack_pointer: usize) -> bool {
        let config = self.vm.config();
        let addr = va.as_usize();
        addr < USER_STACK_TOP
            && addr >= config.stack_floor()
            && addr + config.stack_slack >= stack_pointer
    }

    fn grow_stack(&mut self, va: VirtualAddress) -> Result<(), VmError> {
        let base = va.page_base();
        log::debug!("growing stack to {}", base);
        let record = self.insert_page(Page::anon(base, true))?;
        let mut page = record.lock();
        self.vm.claim(&record, &mut page, &self.directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageKind, address_space::tests::address_space};

    fn user_fault(address: usize, is_write: bool, stack_pointer: usize) -> PageFault {
        PageFault {
            address,
            is_user: true,
            is_write,
            is_present: false,
            stack_pointer,
        }
    }

    #[test]
    fn fault_claims_known_page() {
        let mut space = address_space(4, 8);
        let va = VirtualAddress::new(0x1000);
        space.alloc_page(va, false, None).unwrap();

        space.fault(user_fault(0x1004, false, USER_STACK_TOP)).unwrap();

        assert!(space.find_page(va).unwrap().lock().is_resident());
    }

    #[test]
    fn write_to_read_only_page_terminates() {
        let mut space = address_space(4, 8);
        let va = VirtualAddress::new(0x1000);
        space.alloc_page(va, false, None).unwrap();

        let result = space.fault(user_fault(0x1004, true, USER_STACK_TOP));

        assert_eq!(result, Err(VmError::ReadOnly(VirtualAddress::new(0x1004))));
        assert!(!space.find_page(va).unwrap().lock().is_resident());
    }

    #[test]
    fn write_through_read_only_mapping_is_a_protection_violation() {
        let mut space = address_space(4, 8);
        let va = VirtualAddress::new(0x1000);
        space.alloc_page(va, false, None).unwrap();
        space.claim(va).unwrap();

        assert_eq!(
            space.write_user(0x1000, &[1]),
            Err(VmError::ProtectionViolation(va))
        );
    }

    #[test]
    fn present_fault_terminates() {
        let mut space = address_space(4, 8);
        let mut fault = user_fault(0x1000, true, USER_STACK_TOP);
        fault.is_present = true;
        assert_eq!(
            space.fault(fault),
            Err(VmError::ProtectionViolation(VirtualAddress::new(0x1000)))
        );
    }

    #[test]
    fn null_and_kernel_addresses_terminate() {
        let mut space = address_space(4, 8);
        assert_eq!(
            space.fault(user_fault(0, false, USER_STACK_TOP)),
            Err(VmError::InvalidAccess(0))
        );
        let kernel = crate::arch::canonicalize_virtual(crate::USER_SPACE_END);
        assert_eq!(
            space.fault(user_fault(kernel, false, USER_STACK_TOP)),
            Err(VmError::InvalidAccess(kernel))
        );
        assert_eq!(
            space.fault(user_fault(0x1_0000, false, USER_STACK_TOP)),
            Err(VmError::InvalidAccess(0x1_0000))
        );
    }

    #[test]
    fn unknown_address_terminates() {
        let mut space = address_space(4, 8);
        assert_eq!(
            space.fault(user_fault(0x2000, false, USER_STACK_TOP)),
            Err(VmError::NotMapped(VirtualAddress::new(0x2000)))
        );
        assert!(space.pages().is_empty());
    }

    #[test]
    fn push_just_below_stack_pointer_grows_stack() {
        let mut space = address_space(4, 8);
        let sp = USER_STACK_TOP - 2 * PAGE_SIZE;
        let addr = sp - 8;

        space.fault(user_fault(addr, true, sp)).unwrap();

        let record = space.find_page(VirtualAddress::new(addr)).unwrap();
        let page = record.lock();
        assert!(page.is_resident());
        assert!(page.writable());
        assert_eq!(page.kind(), PageKind::Anon);
    }

    #[test]
    fn access_far_below_stack_pointer_terminates() {
        let mut space = address_space(4, 8);
        let sp = USER_STACK_TOP - 2 * PAGE_SIZE;
        let addr = sp - space.vm().config().stack_slack - 1;

        assert!(space.fault(user_fault(addr, true, sp)).is_err());
        assert!(space.pages().is_empty());
    }

    #[test]
    fn stack_does_not_grow_past_limit() {
        let mut space = address_space(4, 8);
        let floor = space.vm().config().stack_floor();
        let below = floor - 1;

        assert!(space.fault(user_fault(below, true, below)).is_err());
        space.fault(user_fault(floor, true, floor)).unwrap();
    }

    #[test]
    fn emulated_push_grows_stack() {
        let mut space = address_space(4, 8);
        let sp = USER_STACK_TOP - 4;
        space.set_stack_pointer(sp);

        space.write_user(sp, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        space.read_user(sp, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn fault_exit_status_is_failure() {
        assert_eq!(FAULT_EXIT_STATUS, -1);
    }
}
