//! # Clock
//!
//! The tick counter and the tick interrupt entry point.
//!
//! Ticks are a wrapping `u32`. Comparisons against a deadline use the
//! half-range rule: `deadline` is due once `now - deadline < TICK_MAX / 2`.

use crate::config::TICK_MAX;
use crate::thread::ThreadState;
use crate::{Kernel, Timeout};

/// Has `deadline` been reached at `now`?
#[inline]
pub const fn tick_reached(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < TICK_MAX / 2
}

impl Kernel {
    /// Current tick
    pub fn tick_get(&self) -> u32 {
        self.lock().tick
    }

    /// Overwrite the tick counter. Armed timers keep their absolute deadlines.
    pub fn tick_set(&self, tick: u32) {
        self.lock().tick = tick;
    }

    /// Advance time by one tick. Called from the tick interrupt.
    ///
    /// Charges the tick to the running thread's time slice, rotating it
    /// behind its queue-mates when the slice runs out, then fires due timers.
    pub fn tick_increase(&self) {
        let yielded = {
            let mut guard = self.lock();
            let st = &mut *guard;
            st.tick = st.tick.wrapping_add(1);

            let mut expired = false;
            if let Some(thread) = st.current.and_then(|id| st.threads.get_mut(id)) {
                if thread.state == ThreadState::Running {
                    thread.remaining_tick = thread.remaining_tick.saturating_sub(1);
                    if thread.remaining_tick == 0 {
                        thread.remaining_tick = thread.init_tick;
                        expired = true;
                    }
                }
            }
            expired && st.yield_current()
        };

        self.stats().record_tick();
        if yielded {
            self.stats().record_yield();
            self.schedule();
        }
        self.timer_check();
    }

    /// Convert milliseconds to a timeout, rounding up to whole ticks.
    ///
    /// Negative values wait forever.
    pub fn tick_from_millisecond(&self, ms: i32) -> Timeout {
        if ms < 0 {
            return Timeout::Forever;
        }
        let ticks = (u64::from(self.config().tick_per_second) * ms as u64 + 999) / 1000;
        Timeout::from_ticks(u32::try_from(ticks).unwrap_or(TICK_MAX / 2 - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, sim_kernel, spawn};
    use crate::KernelConfig;

    #[test]
    fn test_tick_reached_across_wrap() {
        assert!(tick_reached(10, 10));
        assert!(tick_reached(11, 10));
        assert!(!tick_reached(9, 10));
        assert!(tick_reached(2, u32::MAX - 1));
        assert!(!tick_reached(u32::MAX - 1, 2));
    }

    #[test]
    fn test_tick_set_and_get() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        kernel.tick_set(u32::MAX);
        kernel.tick_increase();
        assert_eq!(kernel.tick_get(), 0);
        assert_eq!(kernel.stats().ticks(), 1);
    }

    #[test]
    fn test_millisecond_conversion_rounds_up() {
        let (_port, kernel) = sim_kernel(KernelConfig::minimal());
        assert_eq!(kernel.tick_from_millisecond(-1), Timeout::Forever);
        assert_eq!(kernel.tick_from_millisecond(0), Timeout::NoWait);
        assert_eq!(kernel.tick_from_millisecond(1), Timeout::Ticks(1));
        assert_eq!(kernel.tick_from_millisecond(10), Timeout::Ticks(1));
        assert_eq!(kernel.tick_from_millisecond(11), Timeout::Ticks(2));
    }

    #[test]
    fn test_slice_expiry_rotates_equal_priority() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let peer = spawn(&kernel, "peer", 10);
        for _ in 0..KernelConfig::DEFAULT_TIME_SLICE - 1 {
            kernel.tick_increase();
        }
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.thread_info(main).remaining_tick, 1);

        kernel.tick_increase();
        assert_eq!(kernel.thread_self(), Some(peer));
        assert_eq!(
            kernel.thread_info(main).remaining_tick,
            KernelConfig::DEFAULT_TIME_SLICE
        );
    }

    #[test]
    fn test_slice_expiry_alone_keeps_running() {
        let (port, kernel, main) = boot(KernelConfig::new());
        let switches = port.switch_count();
        for _ in 0..KernelConfig::DEFAULT_TIME_SLICE * 3 {
            kernel.tick_increase();
        }
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(port.switch_count(), switches);
    }
}
