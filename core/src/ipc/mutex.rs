//! # Mutexes
//!
//! Recursive mutexes with priority inheritance.
//!
//! A thread blocking on a held mutex lends its priority to the owner when it
//! is more urgent. The owner gets its own priority back when it releases the
//! last hold. Waiters are always queued by priority.

use super::{IpcKind, IpcObject, MutexId, WaitPolicy};
use crate::object::{ObjectFlags, ObjectKind};
use crate::scheduler::priority::more_urgent;
use crate::{contract_violation, Kernel, KernelError, KernelResult, ThreadId, Timeout};

/// Mutex payload
#[derive(Debug)]
pub(crate) struct Mutex {
    pub(crate) owner: Option<ThreadId>,
    /// Recursion depth of the owner
    pub(crate) hold: u8,
    /// Owner's priority before any inheritance
    pub(crate) original_priority: u8,
}

impl IpcObject {
    #[track_caller]
    pub(crate) fn mutex(&mut self) -> &mut Mutex {
        match &mut self.kind {
            IpcKind::Mutex(mutex) => mutex,
            _ => contract_violation("object is not a mutex"),
        }
    }
}

fn unlocked() -> IpcKind {
    IpcKind::Mutex(Mutex {
        owner: None,
        hold: 0,
        original_priority: u8::MAX,
    })
}

impl Kernel {
    /// Initialize a mutex owned by the caller's module
    pub fn mutex_init(&self, name: &str) -> KernelResult<MutexId> {
        self.ipc_create(name, ObjectFlags::STATIC, WaitPolicy::Priority, unlocked())
            .map(MutexId)
    }

    /// Create a kernel-allocated mutex
    pub fn mutex_create(&self, name: &str) -> KernelResult<MutexId> {
        self.ipc_create(name, ObjectFlags::empty(), WaitPolicy::Priority, unlocked())
            .map(MutexId)
    }

    /// Release a mutex made by [`Kernel::mutex_init`]
    pub fn mutex_detach(&self, mutex: MutexId) -> KernelResult<()> {
        self.ipc_destroy(mutex.0, ObjectKind::Mutex, true)
    }

    /// Free a mutex made by [`Kernel::mutex_create`]
    pub fn mutex_delete(&self, mutex: MutexId) -> KernelResult<()> {
        self.ipc_destroy(mutex.0, ObjectKind::Mutex, false)
    }

    /// Take the mutex, blocking up to `timeout`.
    ///
    /// The owner may take it again; each take needs a matching release.
    pub fn mutex_take(&self, mutex: MutexId, timeout: Timeout) -> KernelResult<()> {
        let thread = {
            let mut guard = self.lock();
            let st = &mut *guard;
            // ownership belongs to a thread, never to a handler
            st.assert_thread_context();
            let thread = st.current_thread();
            let priority = st.threads[thread].current_priority;
            let mut owner = st.ipc_object(mutex.0, ObjectKind::Mutex).mutex().owner;
            if let Some(id) = owner {
                if st.threads.get(id).map_or(true, |t| t.state.is_closed()) {
                    log::warn!("[kestrel] mutex owner exited while holding it");
                    owner = None;
                }
            }
            let m = st.ipc_object(mutex.0, ObjectKind::Mutex).mutex();

            match owner {
                None => {
                    m.owner = Some(thread);
                    m.hold = 1;
                    m.original_priority = priority;
                    return Ok(());
                }
                Some(owner) if owner == thread => {
                    match m.hold.checked_add(1) {
                        Some(hold) => m.hold = hold,
                        None => {
                            let result = Err(KernelError::Full);
                            st.record_result(&result);
                            return result;
                        }
                    }
                    return Ok(());
                }
                Some(owner) => {
                    if timeout.is_no_wait() {
                        let result = Err(KernelError::Timeout);
                        st.record_result(&result);
                        return result;
                    }
                    if more_urgent(priority, st.threads[owner].current_priority) {
                        log::debug!(
                            "[kestrel] '{}' inherits priority {}",
                            st.threads[owner].name,
                            priority
                        );
                        st.change_priority(owner, priority);
                    }
                }
            }
            st.pend(thread, mutex.0, false, timeout)?;
            thread
        };
        self.schedule();
        self.thread_error(thread)
    }

    /// Take the mutex without blocking
    pub fn mutex_trytake(&self, mutex: MutexId) -> KernelResult<()> {
        self.mutex_take(mutex, Timeout::NoWait)
    }

    /// Release one hold. Fails with `Error` if the caller is not the owner.
    pub fn mutex_release(&self, mutex: MutexId) -> KernelResult<()> {
        let reschedule = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let thread = st.current_thread();
            let m = st.ipc_object(mutex.0, ObjectKind::Mutex).mutex();
            if m.owner != Some(thread) {
                log::warn!("[kestrel] mutex released by a thread that does not own it");
                let result = Err(KernelError::Error);
                st.record_result(&result);
                return result;
            }
            m.hold -= 1;
            if m.hold > 0 {
                return Ok(());
            }

            let original = m.original_priority;
            let mut reschedule = false;
            if st.threads[thread].current_priority != original {
                st.change_priority(thread, original);
                reschedule = true;
            }

            match st.wake_one(mutex.0, false) {
                Some(next) => {
                    let priority = st.threads[next].current_priority;
                    let m = st.ipc[mutex.0].mutex();
                    m.owner = Some(next);
                    m.hold = 1;
                    m.original_priority = priority;
                    reschedule = true;
                }
                None => {
                    let m = st.ipc[mutex.0].mutex();
                    m.owner = None;
                    m.original_priority = u8::MAX;
                }
            }
            reschedule
        };
        if reschedule {
            self.schedule();
        }
        Ok(())
    }

    /// Mutexes accept no control commands
    pub fn mutex_control(&self, _mutex: MutexId) -> KernelResult<()> {
        Err(KernelError::Unsupported)
    }

    /// Current owner
    pub fn mutex_owner(&self, mutex: MutexId) -> Option<ThreadId> {
        self.lock().ipc_object(mutex.0, ObjectKind::Mutex).mutex().owner
    }

    /// Owner's recursion depth
    pub fn mutex_hold(&self, mutex: MutexId) -> u8 {
        self.lock().ipc_object(mutex.0, ObjectKind::Mutex).mutex().hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, spawn};
    use crate::{KernelConfig, ThreadState};

    #[test]
    fn test_recursion_needs_matching_releases() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("rec").unwrap();
        for _ in 0..3 {
            kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        }
        assert_eq!(kernel.mutex_hold(mutex), 3);

        let waiter = spawn(&kernel, "waiter", 4);
        let _ = kernel.mutex_take(mutex, Timeout::Forever);
        assert_eq!(kernel.thread_self(), Some(main));

        kernel.mutex_release(mutex).unwrap();
        kernel.mutex_release(mutex).unwrap();
        assert_eq!(kernel.mutex_owner(mutex), Some(main));
        assert_eq!(kernel.thread_info(waiter).state, ThreadState::Suspended);

        kernel.mutex_release(mutex).unwrap();
        assert_eq!(kernel.mutex_owner(mutex), Some(waiter));
        assert_eq!(kernel.mutex_hold(mutex), 1);
        assert_eq!(kernel.thread_self(), Some(waiter));
        assert_eq!(kernel.thread_error(waiter), Ok(()));
    }

    #[test]
    fn test_owner_inherits_waiter_priority() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("pi").unwrap();
        kernel.mutex_take(mutex, Timeout::Forever).unwrap();

        let urgent = spawn(&kernel, "urgent", 2);
        let _ = kernel.mutex_take(mutex, Timeout::Forever);
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.thread_info(main).current_priority, 2);
        assert_eq!(kernel.thread_info(main).init_priority, 10);

        kernel.mutex_release(mutex).unwrap();
        assert_eq!(kernel.thread_info(main).current_priority, 10);
        assert_eq!(kernel.thread_self(), Some(urgent));
        assert_eq!(kernel.mutex_owner(mutex), Some(urgent));
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("own").unwrap();
        assert_eq!(kernel.mutex_release(mutex), Err(KernelError::Error));

        kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        let other = spawn(&kernel, "other", 3);
        assert_eq!(kernel.thread_self(), Some(other));
        assert_eq!(kernel.mutex_release(mutex), Err(KernelError::Error));
        assert_eq!(kernel.mutex_owner(mutex), Some(main));
    }

    #[test]
    fn test_trytake_on_held_mutex_times_out() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("try").unwrap();
        kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        let other = spawn(&kernel, "other", 3);
        assert_eq!(kernel.mutex_trytake(mutex), Err(KernelError::Timeout));
        assert_eq!(kernel.thread_error(other), Err(KernelError::Timeout));
        // a failed try lends no priority
        assert_eq!(kernel.thread_info(main).current_priority, 10);
    }

    #[test]
    fn test_hold_overflow_is_full() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("deep").unwrap();
        for _ in 0..u8::MAX {
            kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        }
        assert_eq!(kernel.mutex_take(mutex, Timeout::Forever), Err(KernelError::Full));
        assert_eq!(kernel.mutex_hold(mutex), u8::MAX);
        assert_eq!(kernel.thread_error(main), Err(KernelError::Full));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_trytake_from_interrupt_is_fatal() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("isr").unwrap();
        kernel.interrupt_enter();
        let _ = kernel.mutex_trytake(mutex);
    }

    #[test]
    fn test_mutex_left_by_exited_owner_passes_on() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("orphan").unwrap();

        let holder = spawn(&kernel, "holder", 4);
        kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        kernel.thread_exit();
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.mutex_owner(mutex), Some(holder));

        // closed but not yet reclaimed
        kernel.mutex_trytake(mutex).unwrap();
        assert_eq!(kernel.mutex_owner(mutex), Some(main));
        assert_eq!(kernel.mutex_hold(mutex), 1);
        kernel.mutex_release(mutex).unwrap();

        let holder = spawn(&kernel, "holder2", 4);
        kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        kernel.thread_exit();
        kernel.reclaim_defunct();
        assert_eq!(kernel.mutex_owner(mutex), Some(holder));

        kernel.mutex_take(mutex, Timeout::Forever).unwrap();
        assert_eq!(kernel.mutex_owner(mutex), Some(main));
        assert_eq!(kernel.thread_info(main).current_priority, 10);
    }

    #[test]
    fn test_control_is_unsupported() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let mutex = kernel.mutex_create("ctl").unwrap();
        assert_eq!(kernel.mutex_control(mutex), Err(KernelError::Unsupported));
    }
}
