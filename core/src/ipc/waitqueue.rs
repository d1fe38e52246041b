//! # Wait Queues
//!
//! Blocking and waking threads on an IPC object.
//!
//! A blocked thread is suspended, linked on one of its object's queues and,
//! for a finite wait, has its own timer armed. Its recorded error stays
//! `Interrupted` until a waker overwrites it: `Ok` on hand-off, `Timeout`
//! from the timer, `Aborted` when the object is deleted or reset.

use super::WaitPolicy;
use crate::config::TICK_MAX;
use crate::kernel::KernelState;
use crate::thread::Queue;
use crate::{KernelError, KernelResult, ObjectId, ThreadId, Timeout};

impl KernelState {
    /// Block `thread` on `object`
    #[track_caller]
    pub(crate) fn pend(
        &mut self,
        thread: ThreadId,
        object: ObjectId,
        senders: bool,
        timeout: Timeout,
    ) -> KernelResult<()> {
        self.assert_thread_context();
        if let Timeout::Ticks(ticks) = timeout {
            if ticks >= TICK_MAX / 2 {
                return Err(KernelError::InvalidArgument);
            }
        }

        self.threads[thread].error = Err(KernelError::Interrupted);
        self.suspend_thread(thread);

        let priority = self.threads[thread].current_priority;
        let obj = &mut self.ipc[object];
        let policy = obj.policy;
        let list = if senders {
            &mut obj.senders
        } else {
            &mut obj.waiters
        };
        match policy {
            WaitPolicy::Fifo => list.push_back(&mut self.threads, thread),
            WaitPolicy::Priority => {
                let threads = &self.threads;
                let anchor = list
                    .iter(threads)
                    .find(|&waiter| threads[waiter].current_priority > priority);
                match anchor {
                    Some(anchor) => list.insert_before(&mut self.threads, anchor, thread),
                    None => list.push_back(&mut self.threads, thread),
                }
            }
        }
        self.threads[thread].queued_on = Queue::Wait { object, senders };

        if let Timeout::Ticks(ticks) = timeout {
            let timer = self.threads[thread].timer;
            self.timers[timer].init_tick = ticks;
            self.timer_arm(timer)?;
        }
        Ok(())
    }

    /// Hand off to the first thread waiting on `object`
    pub(crate) fn wake_one(&mut self, object: ObjectId, senders: bool) -> Option<ThreadId> {
        let obj = &self.ipc[object];
        let list = if senders { &obj.senders } else { &obj.waiters };
        let thread = list.front()?;
        self.threads[thread].error = Ok(());
        self.resume_thread(thread);
        Some(thread)
    }

    /// Wake every thread waiting on `object` with `Aborted`
    pub(crate) fn wake_all(&mut self, object: ObjectId, senders: bool) -> usize {
        let mut count = 0;
        loop {
            let obj = &self.ipc[object];
            let list = if senders { &obj.senders } else { &obj.waiters };
            let Some(thread) = list.front() else {
                break;
            };
            self.threads[thread].error = Err(KernelError::Aborted);
            self.resume_thread(thread);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use crate::kernel::tests::{boot, spawn};
    use crate::{KernelConfig, KernelError, ThreadState, Timeout, WaitPolicy};
    use alloc::vec::Vec;

    #[test]
    fn test_priority_policy_orders_waiters() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("prio", 0, WaitPolicy::Priority).unwrap();

        // each waiter runs as soon as it starts, then blocks
        let mut spawned = Vec::new();
        for (name, priority) in [("p3", 3), ("p1", 1), ("p2", 2), ("p1b", 1)] {
            let id = spawn(&kernel, name, priority);
            assert_eq!(kernel.thread_self(), Some(id));
            let _ = kernel.sem_take(sem, Timeout::Forever);
            spawned.push(id);
        }
        assert_eq!(kernel.thread_self(), Some(main));

        let st = kernel.lock();
        let order: Vec<_> = st.ipc[sem.0].waiters.iter(&st.threads).collect();
        assert_eq!(order, [spawned[1], spawned[3], spawned[2], spawned[0]]);
    }

    #[test]
    fn test_fifo_policy_keeps_arrival_order() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("fifo", 0, WaitPolicy::Fifo).unwrap();
        let mut spawned = Vec::new();
        for (name, priority) in [("p3", 3), ("p1", 1), ("p2", 2)] {
            let id = spawn(&kernel, name, priority);
            let _ = kernel.sem_take(sem, Timeout::Forever);
            spawned.push(id);
        }
        assert_eq!(kernel.thread_self(), Some(main));

        for &expected in &spawned {
            kernel.sem_release(sem).unwrap();
            assert_eq!(kernel.thread_info(expected).state, ThreadState::Running);
            assert_eq!(kernel.thread_error(expected), Ok(()));
            kernel.thread_suspend(expected).unwrap();
        }
    }

    #[test]
    fn test_timed_wait_times_out_after_exactly_t_ticks() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("timed", 0, WaitPolicy::Fifo).unwrap();
        let start = kernel.tick_get();
        let _ = kernel.sem_take(sem, Timeout::Ticks(7));
        assert_eq!(kernel.thread_info(main).state, ThreadState::Suspended);

        while kernel.tick_get() < start + 6 {
            kernel.tick_increase();
        }
        assert_eq!(kernel.thread_info(main).state, ThreadState::Suspended);
        assert_eq!(kernel.thread_error(main), Err(KernelError::Interrupted));

        kernel.tick_increase();
        assert_eq!(kernel.tick_get(), start + 7);
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.thread_error(main), Err(KernelError::Timeout));
        assert_eq!(kernel.ipc_waiting(sem.object()), 0);
        assert_eq!(kernel.sem_value(sem), 0);
    }

    #[test]
    fn test_release_before_timeout_disarms_timer() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("early", 0, WaitPolicy::Fifo).unwrap();
        let _ = kernel.sem_take(sem, Timeout::Ticks(50));
        assert_eq!(kernel.timer_armed_count(), 1);

        kernel.sem_release(sem).unwrap();
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.thread_error(main), Ok(()));
        assert_eq!(kernel.timer_armed_count(), 0);
    }

    #[test]
    fn test_delete_aborts_every_waiter() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("doomed", 0, WaitPolicy::Fifo).unwrap();
        let mut waiters = Vec::new();
        for (name, priority) in [("w1", 4), ("w2", 5), ("w3", 6)] {
            waiters.push(spawn(&kernel, name, priority));
            let _ = kernel.sem_take(sem, Timeout::Forever);
        }
        assert_eq!(kernel.thread_self(), Some(main));
        assert_eq!(kernel.ipc_waiting(sem.object()), 3);

        kernel.sem_delete(sem).unwrap();
        for &waiter in &waiters {
            assert_eq!(kernel.thread_error(waiter), Err(KernelError::Aborted));
            assert!(kernel.thread_info(waiter).state.is_runnable());
        }
        assert_eq!(kernel.thread_self(), Some(waiters[0]));
    }

    #[test]
    fn test_huge_timeout_is_rejected() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("huge", 0, WaitPolicy::Fifo).unwrap();
        assert_eq!(
            kernel.sem_take(sem, Timeout::Ticks(u32::MAX)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(kernel.thread_info(main).state, ThreadState::Running);
    }
}
