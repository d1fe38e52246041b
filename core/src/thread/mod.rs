//! # Threads
//!
//! Thread control blocks and the thread state machine.
//!
//! ```text
//! Init --startup--> Suspended --resume--> Ready <--switch--> Running
//!                      ^                    |                  |
//!                      +------suspend-------+------------------+
//! any --exit/delete/detach--> Close
//! ```
//!
//! A thread's single `tlist` link is on at most one list at a time: its
//! ready-queue level, one wait queue, or the defunct list. [`tcb::Queue`]
//! records which one, so removal never searches.

pub mod ops;
pub mod states;
pub mod tcb;

pub use ops::ThreadCommand;
pub use states::{ThreadState, ThreadStatus};
pub use tcb::ThreadInfo;

pub(crate) use tcb::{Queue, Thread, ThreadParams};

use crate::kernel::KernelState;
use crate::list::{Link, Links};
use crate::object::slab::Slab;
use crate::object::ObjectHandle;
use crate::{contract_violation, KernelError, ThreadId};

impl Links<ThreadId> for Slab<ThreadId, Thread> {
    fn link(&self, id: ThreadId) -> &Link<ThreadId> {
        &self[id].tlist
    }

    fn link_mut(&mut self, id: ThreadId) -> &mut Link<ThreadId> {
        &mut self[id].tlist
    }
}

impl KernelState {
    /// Move `id` to `to`, which must be reachable from its current state
    #[track_caller]
    pub(crate) fn set_state(&mut self, id: ThreadId, to: ThreadState) {
        let thread = &mut self.threads[id];
        if !thread.state.can_transition_to(to) {
            contract_violation("illegal thread state transition");
        }
        thread.state = to;
    }

    /// Queue `id` at the tail of its ready level
    fn make_ready(&mut self, id: ThreadId) {
        self.ready.insert(&mut self.threads, id);
        self.set_state(id, ThreadState::Ready);
        self.threads[id].queued_on = Queue::Ready;
    }

    fn remove_ready(&mut self, id: ThreadId) {
        self.ready.remove(&mut self.threads, id);
        self.threads[id].queued_on = Queue::None;
    }

    /// Take `id` off the ready queue. The caller decides where it waits.
    #[track_caller]
    pub(crate) fn suspend_thread(&mut self, id: ThreadId) {
        let thread = &self.threads[id];
        if !thread.state.is_runnable() {
            contract_violation("suspend of a thread that is not ready");
        }
        log::debug!("[kestrel] suspend thread '{}'", thread.name);

        self.remove_ready(id);
        self.set_state(id, ThreadState::Suspended);
        let timer = self.threads[id].timer;
        self.timer_disarm(timer);

        if let Some(hook) = self.hooks.suspend {
            hook(id);
        }
    }

    /// Move a suspended thread back to the ready queue
    #[track_caller]
    pub(crate) fn resume_thread(&mut self, id: ThreadId) {
        let thread = &self.threads[id];
        if thread.state != ThreadState::Suspended {
            contract_violation("resume of a thread that is not suspended");
        }
        log::debug!("[kestrel] resume thread '{}'", thread.name);

        self.unlink_wait(id);
        let timer = self.threads[id].timer;
        self.timer_disarm(timer);
        self.make_ready(id);

        if let Some(hook) = self.hooks.resume {
            hook(id);
        }
    }

    /// Remove `id` from the wait queue it is on, if any
    pub(crate) fn unlink_wait(&mut self, id: ThreadId) {
        if let Queue::Wait { object, senders } = self.threads[id].queued_on {
            let obj = &mut self.ipc[object];
            let list = if senders {
                &mut obj.senders
            } else {
                &mut obj.waiters
            };
            list.remove(&mut self.threads, id);
            self.threads[id].queued_on = Queue::None;
        }
    }

    /// Wake a thread whose wait timed out
    pub(crate) fn thread_timeout(&mut self, id: ThreadId) {
        if self.threads[id].state != ThreadState::Suspended {
            contract_violation("timeout of a thread that is not suspended");
        }
        self.threads[id].error = Err(KernelError::Timeout);
        self.resume_thread(id);
    }

    /// Detach `id` from every kernel structure and mark it closed
    #[track_caller]
    pub(crate) fn close_thread(&mut self, id: ThreadId) {
        if !self.threads[id].state.can_transition_to(ThreadState::Close) {
            contract_violation("thread already closed");
        }
        match self.threads[id].queued_on {
            Queue::None => {}
            Queue::Ready => self.remove_ready(id),
            Queue::Wait { .. } => self.unlink_wait(id),
            Queue::Defunct => {
                self.defunct.remove(&mut self.threads, id);
                self.threads[id].queued_on = Queue::None;
            }
        }
        let timer = self.threads[id].timer;
        self.timer_disarm(timer);

        self.set_state(id, ThreadState::Close);
        let thread = &mut self.threads[id];
        thread.status = ThreadStatus::empty();
        log::debug!("[kestrel] close thread '{}'", thread.name);
    }

    /// Hand a closed thread to the reclaimer
    pub(crate) fn push_defunct(&mut self, id: ThreadId) {
        self.defunct.push_back(&mut self.threads, id);
        self.threads[id].queued_on = Queue::Defunct;
    }

    /// Free a closed thread's TCB and timer.
    ///
    /// The TCB is returned so the stack can be dropped after the lock.
    pub(crate) fn destroy_thread(&mut self, id: ThreadId) -> Option<Thread> {
        let thread = self.threads.remove(id)?;
        self.timers.remove(thread.timer);
        self.registry
            .unregister(&thread.name, ObjectHandle::Thread(id));
        Some(thread)
    }

    /// Change the effective priority of `id`, re-queueing it if ready
    #[track_caller]
    pub(crate) fn change_priority(&mut self, id: ThreadId, priority: u8) {
        if priority as usize >= self.ready.priority_max() {
            contract_violation("priority out of range");
        }
        let queued = self.threads[id].queued_on == Queue::Ready;
        if queued {
            self.ready.remove(&mut self.threads, id);
        }
        let mask = self.ready.mask_for(priority);
        let thread = &mut self.threads[id];
        thread.current_priority = priority;
        thread.mask = mask;
        if queued {
            self.ready.insert(&mut self.threads, id);
        }
    }

    /// Rotate the running thread behind its queue-mates
    pub(crate) fn yield_current(&mut self) -> bool {
        let Some(id) = self.current else {
            return false;
        };
        match self.threads.get(id) {
            Some(thread)
                if thread.state == ThreadState::Running && thread.queued_on == Queue::Ready => {}
            _ => return false,
        }
        self.ready.rotate(&mut self.threads, id)
    }
}
