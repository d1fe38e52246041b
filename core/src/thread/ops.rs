//! # Thread Operations
//!
//! Public thread API of the kernel.

use super::{Queue, Thread, ThreadInfo, ThreadParams, ThreadState};
use crate::config::{THREAD_STACK_MIN, TICK_MAX};
use crate::object::{make_name, ObjectFlags, ObjectHandle, Storage};
use crate::timer::Timer;
use crate::{contract_violation, Kernel, KernelError, KernelResult, ThreadId, Timeout};
use kestrel_hal::{align_stack_down, EntryFn};

/// Thread control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCommand {
    /// Start an initialized thread
    Startup,
    /// Delete or detach the thread, whichever matches how it was made
    Close,
    /// Change the effective priority
    ChangePriority(u8),
}

/// Return address of every thread entry function
fn thread_return() {
    crate::kernel().thread_exit();
}

impl Kernel {
    /// Initialize a thread on a caller-supplied stack
    pub fn thread_init(
        &self,
        name: &str,
        entry: EntryFn,
        parameter: usize,
        stack: &'static mut [u8],
        priority: u8,
        tick: u32,
    ) -> KernelResult<ThreadId> {
        self.thread_setup(ThreadParams {
            name: make_name(name),
            flags: ObjectFlags::STATIC,
            entry,
            parameter,
            stack: Storage::Static(stack),
            sp: 0,
            priority,
            tick,
        })
    }

    /// Create a thread with a kernel-allocated stack
    pub fn thread_create(
        &self,
        name: &str,
        entry: EntryFn,
        parameter: usize,
        stack_size: usize,
        priority: u8,
        tick: u32,
    ) -> KernelResult<ThreadId> {
        if stack_size < THREAD_STACK_MIN {
            return Err(KernelError::InvalidArgument);
        }
        self.thread_setup(ThreadParams {
            name: make_name(name),
            flags: ObjectFlags::empty(),
            entry,
            parameter,
            stack: Storage::allocate(stack_size, b'#')?,
            sp: 0,
            priority,
            tick,
        })
    }

    fn thread_setup(&self, mut params: ThreadParams) -> KernelResult<ThreadId> {
        if params.priority as u16 >= self.config().priority_max {
            contract_violation("thread priority out of range");
        }
        if params.stack.len() < THREAD_STACK_MIN {
            return Err(KernelError::InvalidArgument);
        }
        if params.tick == 0 {
            params.tick = self.config().default_time_slice;
        }

        params.stack.as_mut_slice().fill(b'#');
        let base = params.stack.as_slice().as_ptr() as usize;
        let top = align_stack_down(base + params.stack.len() - core::mem::size_of::<usize>());
        params.sp = self
            .port()
            .stack_init(params.entry, params.parameter, top, Some(thread_return));

        let name = params.name.clone();
        let mut guard = self.lock();
        let st = &mut *guard;

        let id: ThreadId = st.threads.next_key();
        let timer = st.timers.insert(Timer::for_thread(name.clone(), id))?;
        if let Err(err) = st.threads.insert(Thread::new(params, timer)) {
            st.timers.remove(timer);
            return Err(err);
        }
        if let Err(err) = st.registry.register(&name, ObjectHandle::Thread(id)) {
            st.threads.remove(id);
            st.timers.remove(timer);
            return Err(err);
        }

        if let Some(hook) = st.hooks.inited {
            hook(id);
        }
        log::debug!("[kestrel] thread '{}' initialized", name);
        Ok(id)
    }

    /// Start an initialized thread.
    ///
    /// Reschedules only once the scheduler has a current thread, so threads
    /// can be started during bring-up.
    pub fn thread_startup(&self, thread: ThreadId) -> KernelResult<()> {
        let running = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let t = &st.threads[thread];
            if t.state != ThreadState::Init {
                contract_violation("startup of a thread that is not in Init");
            }
            let priority = t.init_priority;
            let mask = st.ready.mask_for(priority);

            let t = &mut st.threads[thread];
            t.current_priority = priority;
            t.mask = mask;
            st.set_state(thread, ThreadState::Suspended);
            let t = &st.threads[thread];
            log::debug!("[kestrel] startup thread '{}' at priority {}", t.name, priority);

            st.resume_thread(thread);
            st.current.is_some()
        };
        if running {
            self.schedule();
        }
        Ok(())
    }

    /// The calling thread
    pub fn thread_self(&self) -> Option<ThreadId> {
        self.lock().current
    }

    /// Find a thread by name
    pub fn thread_find(&self, name: &str) -> Option<ThreadId> {
        match self.object_find(name)? {
            ObjectHandle::Thread(id) => Some(id),
            _ => None,
        }
    }

    /// Terminate the calling thread.
    ///
    /// A caller-placed thread without cleanup is released at once; any other
    /// thread is parked on the defunct list for [`Kernel::reclaim_defunct`].
    pub fn thread_exit(&self) {
        let released = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let id = st.current_thread();
            st.close_thread(id);
            let t = &st.threads[id];
            if t.is_static() && t.cleanup.is_none() {
                st.destroy_thread(id)
            } else {
                st.push_defunct(id);
                None
            }
        };
        drop(released);
        self.schedule();
    }

    /// Delete a kernel-created thread
    pub fn thread_delete(&self, thread: ThreadId) -> KernelResult<()> {
        let was_current = {
            let mut st = self.lock();
            if st.threads[thread].is_static() {
                contract_violation("thread_delete on a caller-placed thread");
            }
            st.close_thread(thread);
            st.push_defunct(thread);
            st.current == Some(thread)
        };
        if was_current {
            self.schedule();
        }
        Ok(())
    }

    /// Detach a caller-placed thread
    pub fn thread_detach(&self, thread: ThreadId) -> KernelResult<()> {
        let (was_current, released) = {
            let mut st = self.lock();
            if !st.threads[thread].is_static() {
                contract_violation("thread_detach on a kernel-created thread");
            }
            st.close_thread(thread);
            let released = if st.threads[thread].cleanup.is_some() {
                st.push_defunct(thread);
                None
            } else {
                st.destroy_thread(thread)
            };
            (st.current == Some(thread), released)
        };
        drop(released);
        if was_current {
            self.schedule();
        }
        Ok(())
    }

    /// Release closed threads: run their cleanup callbacks once and free
    /// their memory. Returns how many were reclaimed.
    pub fn reclaim_defunct(&self) -> usize {
        let mut count = 0;
        loop {
            let (id, cleanup) = {
                let mut guard = self.lock();
                let st = &mut *guard;
                let Some(id) = st.defunct.pop_front(&mut st.threads) else {
                    break;
                };
                let t = &mut st.threads[id];
                t.queued_on = Queue::None;
                (id, t.cleanup.take())
            };
            if let Some(cleanup) = cleanup {
                cleanup(id);
            }
            let released = self.lock().destroy_thread(id);
            drop(released);
            count += 1;
        }
        if count > 0 {
            log::debug!("[kestrel] reclaimed {} defunct threads", count);
        }
        count
    }

    /// Give up the CPU to the next thread of the same priority
    pub fn thread_yield(&self) {
        let moved = self.lock().yield_current();
        if moved {
            self.stats().record_yield();
            self.schedule();
        }
    }

    /// Sleep for `ticks` ticks
    pub fn thread_sleep(&self, ticks: u32) -> KernelResult<()> {
        if ticks == 0 {
            self.thread_yield();
            return Ok(());
        }
        if ticks >= TICK_MAX / 2 {
            return Err(KernelError::InvalidArgument);
        }
        let id = {
            let mut st = self.lock();
            st.assert_thread_context();
            let id = st.current_thread();
            st.threads[id].error = Err(KernelError::Interrupted);
            st.suspend_thread(id);
            let timer = st.threads[id].timer;
            st.timers[timer].init_tick = ticks;
            st.timer_arm(timer)?;
            id
        };
        self.schedule();
        match self.thread_error(id) {
            Err(KernelError::Timeout) => Ok(()),
            other => other,
        }
    }

    /// Alias of [`Kernel::thread_sleep`]
    pub fn thread_delay(&self, ticks: u32) -> KernelResult<()> {
        self.thread_sleep(ticks)
    }

    /// Sleep for at least `ms` milliseconds
    pub fn thread_mdelay(&self, ms: u32) -> KernelResult<()> {
        let ms = i32::try_from(ms).map_err(|_| KernelError::InvalidArgument)?;
        match self.tick_from_millisecond(ms) {
            Timeout::Ticks(ticks) => self.thread_sleep(ticks),
            _ => self.thread_sleep(0),
        }
    }

    /// Suspend a ready thread
    pub fn thread_suspend(&self, thread: ThreadId) -> KernelResult<()> {
        let was_current = {
            let mut st = self.lock();
            st.suspend_thread(thread);
            st.current == Some(thread)
        };
        if was_current {
            self.schedule();
        }
        Ok(())
    }

    /// Resume a suspended thread
    pub fn thread_resume(&self, thread: ThreadId) -> KernelResult<()> {
        self.lock().resume_thread(thread);
        self.schedule();
        Ok(())
    }

    /// Control a thread
    pub fn thread_control(&self, thread: ThreadId, cmd: ThreadCommand) -> KernelResult<()> {
        match cmd {
            ThreadCommand::Startup => self.thread_startup(thread),
            ThreadCommand::Close => {
                let is_static = self.lock().threads[thread].is_static();
                if is_static {
                    self.thread_detach(thread)
                } else {
                    self.thread_delete(thread)
                }
            }
            ThreadCommand::ChangePriority(priority) => {
                self.lock().change_priority(thread, priority);
                self.schedule();
                Ok(())
            }
        }
    }

    /// Last error recorded on `thread`
    pub fn thread_error(&self, thread: ThreadId) -> KernelResult<()> {
        self.lock().threads[thread].error
    }

    /// Snapshot of `thread`
    pub fn thread_info(&self, thread: ThreadId) -> ThreadInfo {
        self.lock().threads[thread].info()
    }

    /// Install the callback run once when `thread` is reclaimed
    pub fn thread_set_cleanup(&self, thread: ThreadId, cleanup: Option<fn(ThreadId)>) {
        self.lock().threads[thread].cleanup = cleanup;
    }

    /// Attach a user data word to `thread`
    pub fn thread_set_user_data(&self, thread: ThreadId, data: usize) {
        self.lock().threads[thread].user_data = data;
    }

    /// User data word of `thread`
    pub fn thread_user_data(&self, thread: ThreadId) -> usize {
        self.lock().threads[thread].user_data
    }

    /// Number of live threads, including closed ones not yet reclaimed
    pub fn thread_count(&self) -> usize {
        self.lock().threads.len()
    }
}
