use crate::arch;

/// How far below the stack pointer a fault may land and still count as a push.
///
/// x86 `PUSHA` writes 32 bytes below `rsp` before moving it.
pub const STACK_SLACK: usize = 32;

/// Tunables for a [`crate::VirtualMemory`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of frames in the user pool.
    pub frame_count: usize,
    /// Number of page-sized slots on the swap device.
    pub swap_slots: usize,
    /// Maximum size of a user stack, in bytes.
    pub stack_limit: usize,
    /// Distance below the stack pointer that still triggers stack growth.
    pub stack_slack: usize,
}

impl VmConfig {
    /// Returns the lowest address the stack may grow down to.
    pub const fn stack_floor(&self) -> usize {
        arch::USER_STACK_TOP - self.stack_limit
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frame_count: 256,
            swap_slots: 1024,
            stack_limit: arch::DEFAULT_STACK_LIMIT,
            stack_slack: STACK_SLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stack_floor_is_below_top() {
        let config = VmConfig::default();
        assert_eq!(config.stack_floor() + config.stack_limit, arch::USER_STACK_TOP);
        assert!(config.stack_floor() > 0);
    }
}
