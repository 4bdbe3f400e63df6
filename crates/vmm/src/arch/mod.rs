//! Architecture-specific MMU backends.
//!
//! Kernel builds on x86_64 drive the real page tables through the `x86_64` crate. Tests and
//! the `software-emulation` feature swap in a scale model of the same paging hardware so the
//! fault, eviction and swap paths can run on any host.

// The hardware module is always compiled on x86_64 so rust-analyzer sees it during tests.
#[cfg(target_arch = "x86_64")]
#[cfg_attr(any(test, feature = "software-emulation"), allow(dead_code, unused_imports))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use x86_64::*;

#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

