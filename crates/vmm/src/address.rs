//! Address types for physical and virtual memory.
//!
//! Architecture-independent wrappers around raw addresses, plus the translator that turns a
//! physical frame address into something the kernel can dereference. Swap-in, swap-out and
//! frame copies all go through that translation.

use core::fmt;
use core::ops::Add;

use crate::{FrameNumber, PageNumber, arch};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Converts between physical addresses and kernel-visible virtual addresses.
///
/// - `Hardware`: physical memory is direct-mapped at a fixed offset (kernel builds).
/// - `Emulated`: physical memory is a host buffer (tests and `software-emulation`).
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation over a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates an emulated translator backed by `size` bytes of memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Installs the global translator.
    ///
    /// # Panics
    ///
    /// Panics if a translator has already been installed.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns the global translator.
    ///
    /// # Panics
    ///
    /// Panics if no translator has been installed.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns the global translator if one has been installed.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                // SAFETY: the translator is per-thread, set at most once and never dropped
                // before the thread exits, so extending the borrow to 'static is sound for
                // any use on this thread.
                t.get()
                    .map(|translator| unsafe { &*(translator as *const AddressTranslator) })
            })
        }
    }

    /// Translates a physical address to a kernel virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a kernel virtual address to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.ptr_to_phys(virt as *const u8),
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Translates a pointer to a physical address.
    pub fn ptr_to_phys<T>(&self, ptr: *const T) -> usize {
        self.virt_to_phys(ptr as usize)
    }

    /// Carves `size` bytes out of emulated memory.
    ///
    /// Returns None when emulated memory is exhausted or this is a hardware translator.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => mem.allocate(size, align),
        }
    }
}

/// Global address translator.
///
/// Thread-local under emulation so every test gets its own physical memory.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to `align`, which must be a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to `align`, which must be a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (arch::PAGE_SIZE - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Frames handed to user pages are identified by the physical address of their first byte."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the architecture's physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / arch::PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Page records are keyed by the page-aligned virtual address of the page they describe."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address is not canonical for the architecture.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(arch::validate_virtual(addr), "address is not canonical");
        Self(addr)
    }

    /// Creates a virtual address, returning None if it is not canonical.
    ///
    /// Trap handlers use this for faulting addresses, which userland fully controls.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if arch::validate_virtual(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Returns the kernel virtual address through which `phys` can be accessed.
    ///
    /// # Panics
    ///
    /// Panics if no [`AddressTranslator`] has been installed.
    #[inline]
    pub fn direct_mapped(phys: PhysicalAddress) -> Self {
        let translator = AddressTranslator::current();
        let virt = translator.phys_to_virt(phys.as_usize());

        // Host pointers are not canonical for the emulated architecture.
        #[cfg(any(test, feature = "software-emulation"))]
        if matches!(translator, AddressTranslator::Emulated(_)) {
            return Self(virt);
        }

        Self::new(virt)
    }

    /// Converts the address to a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns the base address of the page containing this address.
    #[inline]
    pub const fn page_base(self) -> Self {
        self.align_down(arch::PAGE_SIZE)
    }

    /// Returns true if this address lies in the user half of the address space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < arch::USER_SPACE_END
    }

    /// Returns the page table index at the specified level.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / arch::PAGE_SIZE)
    }
}
