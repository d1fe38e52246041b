//! # Semaphores
//!
//! Counting semaphores with a 16-bit value.

use super::{IpcKind, IpcObject, SemaphoreId, WaitPolicy};
use crate::object::{ObjectFlags, ObjectKind};
use crate::{contract_violation, Kernel, KernelError, KernelResult, Timeout};

/// Semaphore payload
#[derive(Debug)]
pub(crate) struct Semaphore {
    pub(crate) value: u16,
}

/// Semaphore control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreCommand {
    /// Abort every waiter and set a new value
    Reset(u16),
}

impl IpcObject {
    #[track_caller]
    pub(crate) fn semaphore(&mut self) -> &mut Semaphore {
        match &mut self.kind {
            IpcKind::Semaphore(sem) => sem,
            _ => contract_violation("object is not a semaphore"),
        }
    }
}

impl Kernel {
    /// Initialize a semaphore owned by the caller's module
    pub fn sem_init(&self, name: &str, value: u16, policy: WaitPolicy) -> KernelResult<SemaphoreId> {
        self.ipc_create(
            name,
            ObjectFlags::STATIC,
            policy,
            IpcKind::Semaphore(Semaphore { value }),
        )
        .map(SemaphoreId)
    }

    /// Create a kernel-allocated semaphore
    pub fn sem_create(&self, name: &str, value: u16, policy: WaitPolicy) -> KernelResult<SemaphoreId> {
        self.ipc_create(
            name,
            ObjectFlags::empty(),
            policy,
            IpcKind::Semaphore(Semaphore { value }),
        )
        .map(SemaphoreId)
    }

    /// Release a semaphore made by [`Kernel::sem_init`]
    pub fn sem_detach(&self, sem: SemaphoreId) -> KernelResult<()> {
        self.ipc_destroy(sem.0, ObjectKind::Semaphore, true)
    }

    /// Free a semaphore made by [`Kernel::sem_create`]
    pub fn sem_delete(&self, sem: SemaphoreId) -> KernelResult<()> {
        self.ipc_destroy(sem.0, ObjectKind::Semaphore, false)
    }

    /// Take the semaphore, blocking up to `timeout`
    pub fn sem_take(&self, sem: SemaphoreId, timeout: Timeout) -> KernelResult<()> {
        let thread = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let value = &mut st.ipc_object(sem.0, ObjectKind::Semaphore).semaphore().value;
            if *value > 0 {
                *value -= 1;
                return Ok(());
            }
            if timeout.is_no_wait() {
                let result = Err(KernelError::Timeout);
                st.record_result(&result);
                return result;
            }
            let thread = st.current_thread();
            log::trace!("[kestrel] sem take blocks thread '{}'", st.threads[thread].name);
            st.pend(thread, sem.0, false, timeout)?;
            thread
        };
        self.schedule();
        self.thread_error(thread)
    }

    /// Take the semaphore without blocking
    pub fn sem_trytake(&self, sem: SemaphoreId) -> KernelResult<()> {
        self.sem_take(sem, Timeout::NoWait)
    }

    /// Release the semaphore, handing it to the first waiter if any.
    ///
    /// Fails with `Full` when the value is already `u16::MAX`.
    pub fn sem_release(&self, sem: SemaphoreId) -> KernelResult<()> {
        let woke = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let object = st.ipc_object(sem.0, ObjectKind::Semaphore);
            if object.waiters.is_empty() {
                let value = &mut object.semaphore().value;
                *value = value.checked_add(1).ok_or(KernelError::Full)?;
                false
            } else {
                st.wake_one(sem.0, false);
                true
            }
        };
        if woke {
            self.schedule();
        }
        Ok(())
    }

    /// Control a semaphore
    pub fn sem_control(&self, sem: SemaphoreId, cmd: SemaphoreCommand) -> KernelResult<()> {
        match cmd {
            SemaphoreCommand::Reset(value) => {
                let woken = {
                    let mut guard = self.lock();
                    let st = &mut *guard;
                    st.ipc_object(sem.0, ObjectKind::Semaphore).semaphore().value = value;
                    st.wake_all(sem.0, false)
                };
                if woken > 0 {
                    self.schedule();
                }
                Ok(())
            }
        }
    }

    /// Current value
    pub fn sem_value(&self, sem: SemaphoreId) -> u16 {
        self.lock()
            .ipc_object(sem.0, ObjectKind::Semaphore)
            .semaphore()
            .value
    }
}
