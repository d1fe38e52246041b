//! # Kernel Instance
//!
//! The kernel-wide state and its critical-section discipline.

use crate::config::KernelConfig;
use crate::ipc::IpcObject;
use crate::list::List;
use crate::object::registry::Registry;
use crate::object::slab::Slab;
use crate::object::ObjectHandle;
use crate::scheduler::ready::ReadyQueue;
use crate::scheduler::stats::SchedulerStats;
use crate::thread::Thread;
use crate::timer::skiplist::TimerList;
use crate::timer::Timer;
use crate::{contract_violation, KernelResult, ObjectId, ThreadId, TimerId};
use core::ops::{Deref, DerefMut};
use kestrel_hal::{IrqGuard, Port};

/// Observation hooks.
///
/// Thread and scheduler hooks run with the kernel lock held; they must not
/// block or call back into the kernel. Timer hooks bracket user timer
/// callbacks and run unlocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hooks {
    pub(crate) suspend: Option<fn(ThreadId)>,
    pub(crate) resume: Option<fn(ThreadId)>,
    pub(crate) inited: Option<fn(ThreadId)>,
    pub(crate) scheduler: Option<fn(Option<ThreadId>, ThreadId)>,
    pub(crate) timer_enter: Option<fn(TimerId)>,
    pub(crate) timer_exit: Option<fn(TimerId)>,
}

/// Everything guarded by the kernel lock
pub(crate) struct KernelState {
    pub(crate) tick: u32,
    pub(crate) current: Option<ThreadId>,
    pub(crate) ready: ReadyQueue,
    pub(crate) threads: Slab<ThreadId, Thread>,
    pub(crate) timers: Slab<TimerId, Timer>,
    pub(crate) timer_list: TimerList,
    pub(crate) ipc: Slab<ObjectId, IpcObject>,
    pub(crate) registry: Registry,
    pub(crate) defunct: List<ThreadId>,
    pub(crate) sched_lock_nest: u16,
    pub(crate) interrupt_nest: u8,
    /// Switched out by the interrupt in progress. Its stack slot is only
    /// written when the outermost handler returns.
    pub(crate) interrupt_switched_out: Option<ThreadId>,
    pub(crate) hooks: Hooks,
}

impl KernelState {
    fn new(config: &KernelConfig) -> KernelResult<Self> {
        Ok(Self {
            tick: 0,
            current: None,
            ready: ReadyQueue::new(config)?,
            threads: Slab::new(),
            timers: Slab::new(),
            timer_list: TimerList::new(),
            ipc: Slab::new(),
            registry: Registry::new(),
            defunct: List::new(),
            sched_lock_nest: 0,
            interrupt_nest: 0,
            interrupt_switched_out: None,
            hooks: Hooks::default(),
        })
    }

    /// The calling thread
    #[track_caller]
    pub(crate) fn current_thread(&self) -> ThreadId {
        match self.current {
            Some(id) => id,
            None => contract_violation("no current thread"),
        }
    }

    /// Record `result` as the calling thread's last error
    pub(crate) fn record_result<T>(&mut self, result: &KernelResult<T>) {
        if self.interrupt_nest > 0 {
            return;
        }
        let Some(id) = self.current else {
            return;
        };
        if let Some(thread) = self.threads.get_mut(id) {
            thread.error = result.as_ref().map(|_| ()).map_err(|err| *err);
        }
    }

    /// Fail unless called from thread context
    #[track_caller]
    pub(crate) fn assert_thread_context(&self) {
        if self.interrupt_nest > 0 {
            contract_violation("blocking call from interrupt context");
        }
    }
}

/// Held kernel lock.
///
/// Field order matters: the state lock is released before interrupts are
/// restored.
pub(crate) struct KernelGuard<'a> {
    state: spin::MutexGuard<'a, KernelState>,
    _irq: IrqGuard<'a, dyn Port>,
}

impl Deref for KernelGuard<'_> {
    type Target = KernelState;

    fn deref(&self) -> &KernelState {
        &self.state
    }
}

impl DerefMut for KernelGuard<'_> {
    fn deref_mut(&mut self) -> &mut KernelState {
        &mut self.state
    }
}

/// A kernel instance
pub struct Kernel {
    port: &'static dyn Port,
    config: KernelConfig,
    state: spin::Mutex<KernelState>,
    stats: SchedulerStats,
}

impl Kernel {
    /// Create a kernel running on `port`
    pub fn new(port: &'static dyn Port, config: KernelConfig) -> KernelResult<Self> {
        config.validate()?;
        let state = KernelState::new(&config)?;
        log::info!(
            "[kestrel] kernel on port '{}': {} priorities, {} Hz tick",
            port.name(),
            config.priority_max,
            config.tick_per_second
        );
        Ok(Self {
            port,
            config,
            state: spin::Mutex::new(state),
            stats: SchedulerStats::new(),
        })
    }

    /// Hardware port
    pub fn port(&self) -> &'static dyn Port {
        self.port
    }

    /// Configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Scheduler statistics
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Enter the kernel critical section
    pub(crate) fn lock(&self) -> KernelGuard<'_> {
        let irq = IrqGuard::new(self.port);
        KernelGuard {
            state: self.state.lock(),
            _irq: irq,
        }
    }

    /// Look up any object by name
    pub fn object_find(&self, name: &str) -> Option<ObjectHandle> {
        self.lock().registry.find(name)
    }

    /// Install the thread-suspend hook
    pub fn set_suspend_hook(&self, hook: Option<fn(ThreadId)>) {
        self.lock().hooks.suspend = hook;
    }

    /// Install the thread-resume hook
    pub fn set_resume_hook(&self, hook: Option<fn(ThreadId)>) {
        self.lock().hooks.resume = hook;
    }

    /// Install the thread-initialized hook
    pub fn set_inited_hook(&self, hook: Option<fn(ThreadId)>) {
        self.lock().hooks.inited = hook;
    }

    /// Install the scheduler hook, called with `(from, to)` on every switch
    pub fn set_scheduler_hook(&self, hook: Option<fn(Option<ThreadId>, ThreadId)>) {
        self.lock().hooks.scheduler = hook;
    }

    /// Install the hook run before each user timer callback
    pub fn set_timer_enter_hook(&self, hook: Option<fn(TimerId)>) {
        self.lock().hooks.timer_enter = hook;
    }

    /// Install the hook run after each user timer callback
    pub fn set_timer_exit_hook(&self, hook: Option<fn(TimerId)>) {
        self.lock().hooks.timer_exit = hook;
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("port", &self.port.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
