//! # Software Timers
//!
//! One-shot and periodic timers driven by the tick.
//!
//! User timers call a `fn(usize)` with the kernel lock released. Every
//! thread also owns an internal timer whose only action is to time out the
//! thread's sleep or wait; that action runs under the lock.

pub mod skiplist;

use crate::clock::tick_reached;
use crate::config::{TICK_MAX, TIMER_SKIP_LIST_LEVEL};
use crate::kernel::KernelState;
use crate::list::Link;
use crate::object::{make_name, Name, ObjectFlags, ObjectHandle};
use crate::{contract_violation, Kernel, KernelError, KernelResult, ThreadId, TimerId};
use bitflags::bitflags;

bitflags! {
    /// Timer flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimerFlags: u8 {
        /// Armed and linked in the timer list
        const ACTIVATED = 1 << 0;
        /// Re-arm after every expiry
        const PERIODIC = 1 << 1;
    }
}

/// What a timer does when it expires
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerAction {
    /// Time out the owning thread's sleep or wait
    ThreadTimeout(ThreadId),
    /// Call a user function
    Call { func: fn(usize), parameter: usize },
}

/// Timer control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Set the period in ticks
    SetTime(u32),
    /// Read the period
    GetTime,
    /// Fire once
    SetOneShot,
    /// Fire every period
    SetPeriodic,
}

/// Timer object
#[derive(Debug)]
pub(crate) struct Timer {
    pub(crate) name: Name,
    pub(crate) object_flags: ObjectFlags,
    pub(crate) flags: TimerFlags,
    /// Period or delay in ticks
    pub(crate) init_tick: u32,
    /// Absolute deadline while armed
    pub(crate) timeout_tick: u32,
    pub(crate) action: TimerAction,
    pub(crate) rows: [Link<TimerId>; TIMER_SKIP_LIST_LEVEL],
}

impl Timer {
    pub(crate) fn new(
        name: Name,
        object_flags: ObjectFlags,
        flags: TimerFlags,
        init_tick: u32,
        action: TimerAction,
    ) -> Self {
        Self {
            name,
            object_flags,
            flags: flags & TimerFlags::PERIODIC,
            init_tick,
            timeout_tick: 0,
            action,
            rows: [Link::new(); TIMER_SKIP_LIST_LEVEL],
        }
    }

    /// Internal timeout timer of `thread`
    pub(crate) fn for_thread(name: Name, thread: ThreadId) -> Self {
        Self::new(
            name,
            ObjectFlags::STATIC,
            TimerFlags::empty(),
            0,
            TimerAction::ThreadTimeout(thread),
        )
    }

    pub(crate) fn is_active(&self) -> bool {
        self.flags.contains(TimerFlags::ACTIVATED)
    }
}

impl KernelState {
    /// Arm `id` for `init_tick` ticks from now, re-linking it if armed
    pub(crate) fn timer_arm(&mut self, id: TimerId) -> KernelResult<()> {
        let timer = &self.timers[id];
        if timer.init_tick >= TICK_MAX / 2 {
            return Err(KernelError::InvalidArgument);
        }
        if timer.init_tick == 0 && timer.flags.contains(TimerFlags::PERIODIC) {
            return Err(KernelError::InvalidArgument);
        }
        self.timer_disarm(id);

        let now = self.tick;
        let timer = &mut self.timers[id];
        timer.timeout_tick = now.wrapping_add(timer.init_tick);
        timer.flags.insert(TimerFlags::ACTIVATED);
        self.timer_list.insert(&mut self.timers, id);
        Ok(())
    }

    /// Unlink `id` if armed
    pub(crate) fn timer_disarm(&mut self, id: TimerId) {
        if self.timers[id].is_active() {
            self.timer_list.remove(&mut self.timers, id);
            self.timers[id].flags.remove(TimerFlags::ACTIVATED);
        }
    }

    /// Pop the earliest timer if it is due
    fn timer_pop_due(&mut self) -> Option<TimerId> {
        let id = self.timer_list.first()?;
        if !tick_reached(self.tick, self.timers[id].timeout_tick) {
            return None;
        }
        self.timer_disarm(id);
        Some(id)
    }

    #[track_caller]
    fn user_timer(&mut self, id: TimerId, is_static: bool) -> &mut Timer {
        let timer = &mut self.timers[id];
        if matches!(timer.action, TimerAction::ThreadTimeout(_)) {
            contract_violation("thread timers belong to their thread");
        }
        if timer.object_flags.contains(ObjectFlags::STATIC) != is_static {
            contract_violation("timer torn down with the wrong call");
        }
        timer
    }
}

impl Kernel {
    /// Initialize a timer owned by the caller's module
    pub fn timer_init(
        &self,
        name: &str,
        func: fn(usize),
        parameter: usize,
        time: u32,
        flags: TimerFlags,
    ) -> KernelResult<TimerId> {
        self.timer_setup(name, ObjectFlags::STATIC, func, parameter, time, flags)
    }

    /// Create a kernel-allocated timer
    pub fn timer_create(
        &self,
        name: &str,
        func: fn(usize),
        parameter: usize,
        time: u32,
        flags: TimerFlags,
    ) -> KernelResult<TimerId> {
        self.timer_setup(name, ObjectFlags::empty(), func, parameter, time, flags)
    }

    fn timer_setup(
        &self,
        name: &str,
        object_flags: ObjectFlags,
        func: fn(usize),
        parameter: usize,
        time: u32,
        flags: TimerFlags,
    ) -> KernelResult<TimerId> {
        let name = make_name(name);
        let timer = Timer::new(
            name.clone(),
            object_flags,
            flags,
            time,
            TimerAction::Call { func, parameter },
        );
        let mut guard = self.lock();
        let st = &mut *guard;
        let id = st.timers.insert(timer)?;
        if let Err(err) = st.registry.register(&name, ObjectHandle::Timer(id)) {
            st.timers.remove(id);
            return Err(err);
        }
        log::debug!("[kestrel] timer '{}' initialized, {} ticks", name, time);
        Ok(id)
    }

    /// Stop and release a timer made by [`Kernel::timer_init`]
    pub fn timer_detach(&self, timer: TimerId) -> KernelResult<()> {
        self.timer_teardown(timer, true)
    }

    /// Stop and free a timer made by [`Kernel::timer_create`]
    pub fn timer_delete(&self, timer: TimerId) -> KernelResult<()> {
        self.timer_teardown(timer, false)
    }

    fn timer_teardown(&self, id: TimerId, is_static: bool) -> KernelResult<()> {
        let mut st = self.lock();
        let name = st.user_timer(id, is_static).name.clone();
        st.timer_disarm(id);
        st.registry.unregister(&name, ObjectHandle::Timer(id));
        st.timers.remove(id);
        Ok(())
    }

    /// Arm a timer. Restarts it if already armed.
    pub fn timer_start(&self, timer: TimerId) -> KernelResult<()> {
        self.lock().timer_arm(timer)
    }

    /// Disarm a timer. Fails with `Error` if it was not armed.
    pub fn timer_stop(&self, timer: TimerId) -> KernelResult<()> {
        let mut st = self.lock();
        if !st.timers[timer].is_active() {
            return Err(KernelError::Error);
        }
        st.timer_disarm(timer);
        Ok(())
    }

    /// Change or query a timer. Returns its period.
    ///
    /// Changes stop the timer; it must be started again to take effect.
    pub fn timer_control(&self, timer: TimerId, cmd: TimerCommand) -> KernelResult<u32> {
        let mut st = self.lock();
        if cmd != TimerCommand::GetTime {
            st.timer_disarm(timer);
        }
        let t = &mut st.timers[timer];
        match cmd {
            TimerCommand::SetTime(ticks) => {
                if ticks >= TICK_MAX / 2 {
                    return Err(KernelError::InvalidArgument);
                }
                t.init_tick = ticks;
            }
            TimerCommand::GetTime => {}
            TimerCommand::SetOneShot => t.flags.remove(TimerFlags::PERIODIC),
            TimerCommand::SetPeriodic => t.flags.insert(TimerFlags::PERIODIC),
        }
        Ok(t.init_tick)
    }

    /// Is the timer armed?
    pub fn timer_is_active(&self, timer: TimerId) -> bool {
        self.lock().timers[timer].is_active()
    }

    /// Flags of a timer
    pub fn timer_flags(&self, timer: TimerId) -> TimerFlags {
        self.lock().timers[timer].flags
    }

    /// Absolute deadline of an armed timer
    pub fn timer_timeout_tick(&self, timer: TimerId) -> Option<u32> {
        let st = self.lock();
        let t = &st.timers[timer];
        t.is_active().then_some(t.timeout_tick)
    }

    /// Earliest armed deadline
    pub fn timer_next_timeout(&self) -> Option<u32> {
        let st = self.lock();
        let id = st.timer_list.first()?;
        Some(st.timers[id].timeout_tick)
    }

    /// Number of armed timers, thread timeouts included
    pub fn timer_armed_count(&self) -> usize {
        self.lock().timer_list.len()
    }

    /// Fire every due timer. Called from [`Kernel::tick_increase`].
    ///
    /// Periodic timers are re-armed from the current tick before their
    /// callback runs, so a callback may stop or restart its own timer.
    pub fn timer_check(&self) {
        let mut need_schedule = false;
        loop {
            let fired = {
                let mut guard = self.lock();
                let st = &mut *guard;
                let Some(id) = st.timer_pop_due() else {
                    break;
                };

                let timer = &st.timers[id];
                let action = timer.action;
                if timer.flags.contains(TimerFlags::PERIODIC) {
                    if let Err(err) = st.timer_arm(id) {
                        log::warn!("[kestrel] periodic timer not re-armed: {}", err);
                    }
                }
                match action {
                    TimerAction::ThreadTimeout(thread) => {
                        st.thread_timeout(thread);
                        need_schedule = true;
                        None
                    }
                    TimerAction::Call { func, parameter } => {
                        Some((id, func, parameter, st.hooks.timer_enter, st.hooks.timer_exit))
                    }
                }
            };

            if let Some((id, func, parameter, enter, exit)) = fired {
                if let Some(hook) = enter {
                    hook(id);
                }
                func(parameter);
                if let Some(hook) = exit {
                    hook(id);
                }
            }
        }
        if need_schedule {
            self.schedule();
        }
    }
}
