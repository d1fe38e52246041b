//! # Kernel Configuration
//!
//! Build-time constants and the runtime [`KernelConfig`].

use crate::{KernelError, KernelResult};
use static_assertions::const_assert;

/// Maximum length of an object name, in bytes
pub const NAME_MAX: usize = 8;

/// Number of rows in the timer skip list
pub const TIMER_SKIP_LIST_LEVEL: usize = 3;

/// A timer joins the next row up when `random_nr & MASK == 0`
pub const TIMER_SKIP_LIST_MASK: u32 = 3;

/// Size of the per-thread signal table (valid numbers are `1..SIG_MAX`)
pub const SIG_MAX: usize = 32;

/// Largest tick value
pub const TICK_MAX: u32 = u32::MAX;

/// Smallest stack accepted for a thread
pub const THREAD_STACK_MIN: usize = 16 * core::mem::size_of::<usize>();

const_assert!(NAME_MAX > 0);
const_assert!(TIMER_SKIP_LIST_LEVEL >= 1);
const_assert!(TIMER_SKIP_LIST_MASK & (TIMER_SKIP_LIST_MASK + 1) == 0);
const_assert!(SIG_MAX <= 32);

/// Runtime configuration of a kernel instance
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of priority levels (1..=256); 0 is the most urgent
    pub priority_max: u16,
    /// Tick frequency
    pub tick_per_second: u32,
    /// Time slice given to threads created with a zero slice
    pub default_time_slice: u32,
}

impl KernelConfig {
    /// Default priority count
    pub const DEFAULT_PRIORITY_MAX: u16 = 32;
    /// Default tick rate: 1 kHz
    pub const DEFAULT_TICK_PER_SECOND: u32 = 1000;
    /// Default time slice: 10 ticks
    pub const DEFAULT_TIME_SLICE: u32 = 10;

    /// Create default configuration
    pub const fn new() -> Self {
        Self {
            priority_max: Self::DEFAULT_PRIORITY_MAX,
            tick_per_second: Self::DEFAULT_TICK_PER_SECOND,
            default_time_slice: Self::DEFAULT_TIME_SLICE,
        }
    }

    /// Configuration for small parts: 8 priorities, 100 Hz tick
    pub const fn minimal() -> Self {
        Self {
            priority_max: 8,
            tick_per_second: 100,
            default_time_slice: 5,
        }
    }

    /// Configuration using the full two-level priority bitmap
    pub const fn large() -> Self {
        Self {
            priority_max: 256,
            ..Self::new()
        }
    }

    /// Does this configuration need the two-level ready bitmap?
    pub const fn two_level_bitmap(&self) -> bool {
        self.priority_max > 32
    }

    /// Reject configurations the kernel cannot run with
    pub fn validate(&self) -> KernelResult<()> {
        if self.priority_max == 0 || self.priority_max > 256 {
            return Err(KernelError::InvalidArgument);
        }
        if self.tick_per_second == 0 || self.default_time_slice == 0 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(KernelConfig::new().validate().is_ok());
        assert!(KernelConfig::minimal().validate().is_ok());
        assert!(KernelConfig::large().validate().is_ok());
        assert!(!KernelConfig::new().two_level_bitmap());
        assert!(KernelConfig::large().two_level_bitmap());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = KernelConfig::new();
        config.priority_max = 257;
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));

        let config = KernelConfig { tick_per_second: 0, ..KernelConfig::new() };
        assert_eq!(config.validate(), Err(KernelError::InvalidArgument));
    }
}
