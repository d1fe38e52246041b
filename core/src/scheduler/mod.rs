//! # Scheduler
//!
//! Strict-priority preemptive scheduling with round-robin among threads of
//! equal priority.
//!
//! The running thread stays at the head of its ready level in state
//! `Running`; picking the next thread is a find-first-set on the ready
//! bitmap followed by a look at that level's head. The scheduler only decides
//! which saved stack pointer becomes active; the switch itself belongs to the
//! port.

pub mod priority;
pub mod ready;
pub mod stats;

use crate::thread::{ThreadState, ThreadStatus};
use crate::{contract_violation, Kernel};
use alloc::sync::Arc;
use kestrel_hal::StackSlot;

/// A switch decided under the lock, performed after it
struct Switch {
    from: Option<Arc<StackSlot>>,
    to: Arc<StackSlot>,
    in_interrupt: bool,
}

impl Kernel {
    /// Run the most urgent ready thread.
    ///
    /// No-op while the scheduler lock is held or when the pick is already
    /// running.
    pub fn schedule(&self) {
        let switch = {
            let mut guard = self.lock();
            let st = &mut *guard;
            if st.sched_lock_nest > 0 {
                return;
            }
            let Some(next) = st.ready.pick() else {
                return;
            };
            let prev = st.current;
            if prev == Some(next) {
                return;
            }

            let next_priority = st.threads[next].current_priority;
            let from = match prev.filter(|&id| st.threads.contains(id)) {
                Some(id) => {
                    if st.threads[id].state == ThreadState::Running {
                        st.set_state(id, ThreadState::Ready);
                        if priority::more_urgent(next_priority, st.threads[id].current_priority) {
                            self.stats().record_preemption();
                        }
                    }
                    Some(st.threads[id].sp.clone())
                }
                // released on exit; nothing left to save
                None => None,
            };

            let in_interrupt = st.interrupt_nest > 0;
            // a second switch in the same handler keeps the first outgoing
            // thread; the ones in between never ran
            if in_interrupt && from.is_some() && st.interrupt_switched_out.is_none() {
                st.interrupt_switched_out = prev;
            }
            if st.threads[next].status.contains(ThreadStatus::SIGNAL) {
                self.signal_redirect(st, next);
            }

            st.set_state(next, ThreadState::Running);
            st.current = Some(next);
            let thread = &st.threads[next];
            log::trace!("[kestrel] switch to '{}'", thread.name);
            let to = thread.sp.clone();

            if let Some(hook) = st.hooks.scheduler {
                hook(prev, next);
            }
            Switch {
                from,
                to,
                in_interrupt,
            }
        };

        self.stats().record_context_switch();
        match switch.from {
            None => self.port().context_switch_to(&switch.to),
            Some(from) if switch.in_interrupt => {
                self.port().context_switch_interrupt(&from, &switch.to)
            }
            Some(from) => {
                self.port().context_switch(&from, &switch.to);
                self.signal_check_current();
            }
        }
    }

    /// Switch to the first thread. Does not return on hardware.
    pub fn start_scheduler(&self) {
        let to = {
            let mut guard = self.lock();
            let st = &mut *guard;
            if st.current.is_some() {
                contract_violation("scheduler already started");
            }
            let Some(first) = st.ready.pick() else {
                contract_violation("no thread to start the scheduler with");
            };
            st.set_state(first, ThreadState::Running);
            st.current = Some(first);
            let thread = &st.threads[first];
            log::info!(
                "[kestrel] scheduler started with '{}' at priority {}",
                thread.name,
                thread.current_priority
            );
            let to = thread.sp.clone();
            if let Some(hook) = st.hooks.scheduler {
                hook(None, first);
            }
            to
        };
        self.stats().record_context_switch();
        self.port().context_switch_to(&to);
    }

    /// Lock the scheduler. Nests.
    pub fn enter_critical(&self) {
        let mut st = self.lock();
        st.sched_lock_nest = match st.sched_lock_nest.checked_add(1) {
            Some(nest) => nest,
            None => contract_violation("scheduler lock nested too deep"),
        };
    }

    /// Unlock the scheduler, rescheduling when the outermost lock is dropped
    pub fn exit_critical(&self) {
        let reschedule = {
            let mut st = self.lock();
            if st.sched_lock_nest == 0 {
                contract_violation("exit_critical without enter_critical");
            }
            st.sched_lock_nest -= 1;
            st.sched_lock_nest == 0 && st.current.is_some()
        };
        if reschedule {
            self.schedule();
        }
    }

    /// Current scheduler lock depth
    pub fn critical_level(&self) -> u16 {
        self.lock().sched_lock_nest
    }

    /// Mark entry into an interrupt handler
    pub fn interrupt_enter(&self) {
        let mut st = self.lock();
        if st.interrupt_nest == 0 {
            // the previous handler has returned and saved every context
            st.interrupt_switched_out = None;
        }
        st.interrupt_nest = match st.interrupt_nest.checked_add(1) {
            Some(nest) => nest,
            None => contract_violation("interrupts nested too deep"),
        };
    }

    /// Mark exit from an interrupt handler
    pub fn interrupt_leave(&self) {
        let mut st = self.lock();
        if st.interrupt_nest == 0 {
            contract_violation("interrupt_leave without interrupt_enter");
        }
        st.interrupt_nest -= 1;
    }

    /// Current interrupt nesting depth
    pub fn interrupt_nest(&self) -> u8 {
        self.lock().interrupt_nest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, sim_kernel, spawn};
    use crate::{KernelConfig, ThreadId};
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use kestrel_hal::sim::SwitchKind;

    #[test]
    fn test_more_urgent_level_always_wins() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let low = spawn(&kernel, "low", 12);
        assert_eq!(kernel.thread_self(), Some(main));
        let high = spawn(&kernel, "high", 3);
        assert_eq!(kernel.thread_self(), Some(high));

        kernel.thread_suspend(high).unwrap();
        assert_eq!(kernel.thread_self(), Some(main));
        kernel.thread_suspend(main).unwrap();
        assert_eq!(kernel.thread_self(), Some(low));
    }

    #[test]
    fn test_yield_is_round_robin_in_arrival_order() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let a = spawn(&kernel, "a", 10);
        let b = spawn(&kernel, "b", 10);

        let mut order = Vec::new();
        for _ in 0..6 {
            kernel.thread_yield();
            order.push(kernel.thread_self().unwrap());
        }
        assert_eq!(order, [a, b, main, a, b, main]);
        assert_eq!(kernel.stats().yields(), 6);
        assert_eq!(kernel.stats().preemptions(), 0);
    }

    #[test]
    fn test_yield_without_mates_keeps_running() {
        let (port, kernel, main) = boot(KernelConfig::new());
        let switches = port.switch_count();
        kernel.thread_yield();
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(port.switch_count(), switches);
    }

    #[test]
    fn test_two_level_bitmap() {
        let (_port, kernel, main) = boot(KernelConfig::large());
        let deep = spawn(&kernel, "deep", 200);
        let mid = spawn(&kernel, "mid", 40);
        assert_eq!(kernel.thread_self(), Some(main));

        let top = spawn(&kernel, "top", 9);
        assert_eq!(kernel.thread_self(), Some(top));
        assert_eq!(kernel.lock().ready.highest_priority(), Some(9));

        kernel.thread_suspend(top).unwrap();
        kernel.thread_suspend(main).unwrap();
        assert_eq!(kernel.thread_self(), Some(mid));
        kernel.thread_suspend(mid).unwrap();
        assert_eq!(kernel.thread_self(), Some(deep));
        assert_eq!(kernel.lock().ready.highest_priority(), Some(200));
    }

    #[test]
    fn test_emptied_level_clears_bitmap() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        assert_eq!(kernel.lock().ready.level_len(10), 1);
        kernel.thread_suspend(main).unwrap();
        let st = kernel.lock();
        assert_eq!(st.ready.level_len(10), 0);
        assert_eq!(st.ready.highest_priority(), Some(31));
    }

    #[test]
    fn test_scheduler_lock_defers_switch() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        kernel.enter_critical();
        kernel.enter_critical();
        let urgent = spawn(&kernel, "urgent", 1);
        assert_eq!(kernel.thread_self(), Some(main));

        kernel.exit_critical();
        assert_eq!(kernel.critical_level(), 1);
        assert_eq!(kernel.thread_self(), Some(main));
        kernel.exit_critical();
        assert_eq!(kernel.thread_self(), Some(urgent));
    }

    #[test]
    fn test_switch_from_interrupt_uses_interrupt_path() {
        let (port, kernel, main) = boot(KernelConfig::new());
        kernel.interrupt_enter();
        spawn(&kernel, "urgent", 1);
        let record = port.last_switch().unwrap();
        assert_eq!(record.kind, SwitchKind::Interrupt);
        assert_eq!(record.from_sp, Some(kernel.lock().threads[main].sp.get()));
        kernel.interrupt_leave();
        assert_eq!(kernel.interrupt_nest(), 0);
    }

    #[test]
    fn test_scheduler_hook_sees_every_switch() {
        static SWITCHES: AtomicUsize = AtomicUsize::new(0);
        fn hook(_from: Option<ThreadId>, _to: ThreadId) {
            SWITCHES.fetch_add(1, Ordering::SeqCst);
        }
        let (_port, kernel, _main) = boot(KernelConfig::new());
        kernel.set_scheduler_hook(Some(hook));
        let urgent = spawn(&kernel, "urgent", 1);
        kernel.thread_suspend(urgent).unwrap();
        assert_eq!(SWITCHES.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_start_without_threads_is_fatal() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        kernel.start_scheduler();
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_unbalanced_exit_critical_is_fatal() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        kernel.exit_critical();
    }
}
