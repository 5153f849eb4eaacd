use std::sync::atomic::{AtomicU32, Ordering};

/// Superblock state flags (spec.md §3 "State flags").
pub mod state {
    pub const CLEAN: u32 = 1 << 0;
    pub const DIRTY: u32 = 1 << 1;
    pub const TOXIC: u32 = 1 << 2;
    pub const DEGRADED: u32 = 1 << 3;
    pub const LOCKED: u32 = 1 << 4;
    pub const PANIC: u32 = 1 << 5;
    pub const PENDING_WIPE: u32 = 1 << 6;
    pub const NEEDS_UPGRADE: u32 = 1 << 7;
    /// Sticky: once set, never cleared by the broadcast flag policy.
    pub const RUNTIME_SATURATED: u32 = 1 << 8;
    pub const METADATA_ZEROED: u32 = 1 << 9;
}

/// Dirty-bit mask values, distinct from the state-flags word.
pub mod dirty_bits {
    pub const DIRTY_BIT_TAINT: u32 = 1 << 0;
}

const STICKY_MASK: u32 = state::RUNTIME_SATURATED;

/// Atomic OR-into-word surface over the state flags, per Design Notes §9
/// ("Sticky flags via OR-into-atomic").
#[derive(Debug, Default)]
pub struct StateFlags(AtomicU32);

impl StateFlags {
    pub fn new(initial: u32) -> Self
    {
        Self(AtomicU32::new(initial))
    }

    pub fn set_flag(&self, flag: u32)
    {
        self.0.fetch_or(flag, Ordering::AcqRel);
    }

    /// Clearing a sticky flag is a no-op; stickiness is enforced here so
    /// every call site gets it for free instead of having to remember.
    pub fn clear_flag(&self, flag: u32)
    {
        self.0.fetch_and(!(flag & !STICKY_MASK), Ordering::AcqRel);
    }

    pub fn test_flag(&self, flag: u32) -> bool
    {
        self.0.load(Ordering::Acquire) & flag == flag
    }

    pub fn bits(&self) -> u32
    {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_bits(&self, bits: u32)
    {
        self.0.store(bits, Ordering::Release);
    }
}

impl Clone for StateFlags {
    fn clone(&self) -> Self
    {
        Self::new(self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_test()
    {
        let f = StateFlags::new(0);
        f.set_flag(state::DIRTY);
        assert!(f.test_flag(state::DIRTY));
        assert!(!f.test_flag(state::CLEAN));
    }

    #[test]
    fn clear_is_not_sticky_for_saturated()
    {
        let f = StateFlags::new(0);
        f.set_flag(state::RUNTIME_SATURATED);
        f.clear_flag(state::RUNTIME_SATURATED);
        assert!(f.test_flag(state::RUNTIME_SATURATED));
    }

    #[test]
    fn clear_normal_flag()
    {
        let f = StateFlags::new(state::DIRTY | state::CLEAN);
        f.clear_flag(state::DIRTY);
        assert!(!f.test_flag(state::DIRTY));
        assert!(f.test_flag(state::CLEAN));
    }
}
