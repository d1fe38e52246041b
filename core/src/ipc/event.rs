//! # Event Sets
//!
//! 32 event bits that threads wait on with AND or OR matching.

use super::{EventId, IpcKind, IpcObject, WaitPolicy};
use crate::kernel::KernelState;
use crate::object::{ObjectFlags, ObjectKind};
use crate::{contract_violation, Kernel, KernelError, KernelResult, ObjectId, Timeout};
use bitflags::bitflags;

bitflags! {
    /// How a receiver matches event bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventOption: u8 {
        /// Every requested bit must be set
        const AND = 1 << 0;
        /// Any requested bit is enough
        const OR = 1 << 1;
        /// Clear the matched bits on receipt
        const CLEAR = 1 << 2;
    }
}

impl EventOption {
    /// Exactly one of AND and OR is set
    pub fn is_valid(self) -> bool {
        self.contains(EventOption::AND) != self.contains(EventOption::OR)
    }

    /// Bits of `set` satisfied by `pending`, if the match succeeds
    fn matched(self, pending: u32, set: u32) -> Option<u32> {
        if self.contains(EventOption::AND) {
            (pending & set == set).then_some(set)
        } else {
            let bits = pending & set;
            (bits != 0).then_some(bits)
        }
    }
}

/// Event control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCommand {
    /// Abort every waiter and clear all bits
    Reset,
}

/// Event payload
#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) set: u32,
}

impl IpcObject {
    #[track_caller]
    pub(crate) fn event(&mut self) -> &mut Event {
        match &mut self.kind {
            IpcKind::Event(event) => event,
            _ => contract_violation("object is not an event"),
        }
    }
}

impl KernelState {
    /// Wake every waiter of `object` whose request now matches.
    ///
    /// Bits are cleared only after all waiters were evaluated, so several
    /// waiters on one bit all wake.
    fn event_wake_matching(&mut self, object: ObjectId) -> bool {
        let pending = self.ipc[object].event().set;
        let mut clear = 0;
        let mut woke = false;

        let mut cursor = self.ipc[object].waiters.front();
        while let Some(thread) = cursor {
            cursor = self.ipc[object].waiters.next(&self.threads, thread);

            let t = &mut self.threads[thread];
            let Some(bits) = t.event_info.matched(pending, t.event_set) else {
                continue;
            };
            if t.event_info.contains(EventOption::CLEAR) {
                clear |= bits;
            }
            t.event_set = bits;
            t.error = Ok(());
            self.resume_thread(thread);
            woke = true;
        }

        self.ipc[object].event().set &= !clear;
        woke
    }
}

impl Kernel {
    /// Initialize an event set owned by the caller's module
    pub fn event_init(&self, name: &str, policy: WaitPolicy) -> KernelResult<EventId> {
        self.ipc_create(name, ObjectFlags::STATIC, policy, IpcKind::Event(Event { set: 0 }))
            .map(EventId)
    }

    /// Create a kernel-allocated event set
    pub fn event_create(&self, name: &str, policy: WaitPolicy) -> KernelResult<EventId> {
        self.ipc_create(name, ObjectFlags::empty(), policy, IpcKind::Event(Event { set: 0 }))
            .map(EventId)
    }

    /// Release an event set made by [`Kernel::event_init`]
    pub fn event_detach(&self, event: EventId) -> KernelResult<()> {
        self.ipc_destroy(event.0, ObjectKind::Event, true)
    }

    /// Free an event set made by [`Kernel::event_create`]
    pub fn event_delete(&self, event: EventId) -> KernelResult<()> {
        self.ipc_destroy(event.0, ObjectKind::Event, false)
    }

    /// Post `set` and wake every waiter it satisfies
    pub fn event_send(&self, event: EventId, set: u32) -> KernelResult<()> {
        if set == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let woke = {
            let mut st = self.lock();
            st.ipc_object(event.0, ObjectKind::Event).event().set |= set;
            st.event_wake_matching(event.0)
        };
        if woke {
            self.schedule();
        }
        Ok(())
    }

    /// Wait for bits of `set`, returning the bits that matched
    pub fn event_recv(
        &self,
        event: EventId,
        set: u32,
        option: EventOption,
        timeout: Timeout,
    ) -> KernelResult<u32> {
        if set == 0 || !option.is_valid() {
            return Err(KernelError::InvalidArgument);
        }
        let thread = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let pending = &mut st.ipc_object(event.0, ObjectKind::Event).event().set;
            if let Some(bits) = option.matched(*pending, set) {
                if option.contains(EventOption::CLEAR) {
                    *pending &= !bits;
                }
                return Ok(bits);
            }
            if timeout.is_no_wait() {
                let result = Err(KernelError::Timeout);
                st.record_result(&result);
                return result;
            }

            let thread = st.current_thread();
            let t = &mut st.threads[thread];
            t.event_set = set;
            t.event_info = option;
            st.pend(thread, event.0, false, timeout)?;
            thread
        };
        self.schedule();
        self.thread_error(thread)?;
        Ok(self.lock().threads[thread].event_set)
    }

    /// Control an event set
    pub fn event_control(&self, event: EventId, cmd: EventCommand) -> KernelResult<()> {
        match cmd {
            EventCommand::Reset => {
                let woken = {
                    let mut st = self.lock();
                    st.ipc_object(event.0, ObjectKind::Event).event().set = 0;
                    st.wake_all(event.0, false)
                };
                if woken > 0 {
                    self.schedule();
                }
                Ok(())
            }
        }
    }

    /// Pending bits
    pub fn event_value(&self, event: EventId) -> u32 {
        self.lock().ipc_object(event.0, ObjectKind::Event).event().set
    }
}
