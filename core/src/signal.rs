//! # Signals
//!
//! Asynchronous per-thread notifications.
//!
//! A raised signal is delivered once it is unmasked:
//! - a blocked target is woken with its wait interrupted and handles the
//!   signal when it next runs
//! - the calling thread runs the handler before `thread_kill` returns
//! - any other ready thread gets a trampoline frame pushed below its saved
//!   stack pointer, so its next switch-in runs [`signal_entry`] first
//! - a thread signalled from an interrupt, or woken by a signal, gets that
//!   frame when the scheduler next switches it in
//!
//! Handlers always run with the kernel lock released.

use crate::config::SIG_MAX;
use crate::kernel::KernelState;
use crate::thread::{ThreadState, ThreadStatus};
use crate::{Kernel, KernelError, KernelResult, ThreadId};
use alloc::vec::Vec;

/// Room left between the interrupted stack pointer and the trampoline frame
const SIGNAL_FRAME_GAP: usize = 32;

/// What a thread does with a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalAction {
    /// Log and carry on
    #[default]
    Default,
    /// Drop the signal
    Ignore,
    /// Run a handler with the signal number
    Handler(fn(i32)),
}

/// Where a thread resumes on its next switch-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalFrame {
    /// Its own saved context
    Normal,
    /// The signal trampoline; `saved_sp` is restored afterwards
    Redirected { saved_sp: usize },
}

/// Per-thread signal bookkeeping
#[derive(Debug)]
pub(crate) struct SignalState {
    pub(crate) pending: u32,
    /// Deliverable signals. Everything starts masked.
    pub(crate) unmasked: u32,
    /// Allocated on first install
    vectors: Option<Vec<SignalAction>>,
    pub(crate) frame: SignalFrame,
}

impl SignalState {
    pub(crate) const fn new() -> Self {
        Self {
            pending: 0,
            unmasked: 0,
            vectors: None,
            frame: SignalFrame::Normal,
        }
    }

    fn deliverable(&self) -> u32 {
        self.pending & self.unmasked
    }

    fn action(&self, signo: usize) -> SignalAction {
        self.vectors
            .as_ref()
            .map_or(SignalAction::Default, |vectors| vectors[signo])
    }
}

fn signal_bit(signo: i32) -> KernelResult<u32> {
    match usize::try_from(signo) {
        Ok(n) if (1..SIG_MAX).contains(&n) => Ok(1 << n),
        _ => Err(KernelError::InvalidArgument),
    }
}

/// Follow-up owed once the lock is released
enum Delivery {
    None,
    Reschedule,
    HandleNow,
}

/// Trampoline entry pushed onto a thread's stack for signal delivery
pub fn signal_entry(_: usize) {
    crate::kernel().signal_trampoline();
}

impl Kernel {
    /// Deliver the deliverable signals of `thread`
    fn signal_deliver(&self, st: &mut KernelState, thread: ThreadId) -> Delivery {
        let is_current = st.current == Some(thread);
        let in_interrupt = st.interrupt_nest > 0;
        let t = &mut st.threads[thread];
        if t.signal.deliverable() == 0 {
            return Delivery::None;
        }

        let state = t.state;
        match state {
            ThreadState::Init | ThreadState::Close => Delivery::None,
            ThreadState::Suspended => {
                t.status.insert(ThreadStatus::SIGNAL);
                st.resume_thread(thread);
                Delivery::Reschedule
            }
            ThreadState::Ready | ThreadState::Running if is_current => {
                t.status.insert(ThreadStatus::SIGNAL);
                // from an interrupt the frame is built when the thread is
                // next switched in
                if in_interrupt {
                    Delivery::None
                } else {
                    Delivery::HandleNow
                }
            }
            ThreadState::Ready | ThreadState::Running => {
                t.status.insert(ThreadStatus::SIGNAL);
                self.signal_redirect(st, thread);
                Delivery::None
            }
        }
    }

    /// Push a trampoline frame below the saved stack pointer of `thread`.
    ///
    /// Skipped when a frame is already in place, when nothing is
    /// deliverable, or when the thread was switched out by the interrupt in
    /// progress and its slot does not hold its context yet.
    pub(crate) fn signal_redirect(&self, st: &mut KernelState, thread: ThreadId) {
        let unsaved = st.interrupt_nest > 0 && st.interrupt_switched_out == Some(thread);
        let t = &mut st.threads[thread];
        if unsaved || t.signal.frame != SignalFrame::Normal || t.signal.deliverable() == 0 {
            return;
        }
        let saved_sp = t.sp.get();
        let sp = self.port().stack_init(
            signal_entry,
            0,
            saved_sp.saturating_sub(SIGNAL_FRAME_GAP),
            None,
        );
        t.sp.set(sp);
        t.signal.frame = SignalFrame::Redirected { saved_sp };
        log::debug!("[kestrel] redirect '{}' to the signal trampoline", t.name);
    }

    fn signal_follow_up(&self, thread: ThreadId, delivery: Delivery) {
        match delivery {
            Delivery::None => {}
            Delivery::Reschedule => self.schedule(),
            Delivery::HandleNow => self.signal_handle(thread, true),
        }
    }

    /// Run the handlers of every deliverable signal of `thread`, lowest
    /// number first. `clean` also drops the SIGNAL status bit.
    fn signal_handle(&self, thread: ThreadId, clean: bool) {
        let Some(error) = self.lock().threads.get(thread).map(|t| t.error) else {
            return;
        };
        loop {
            let (signo, action) = {
                let mut st = self.lock();
                let Some(t) = st.threads.get_mut(thread) else {
                    return;
                };
                let deliverable = t.signal.deliverable();
                if deliverable == 0 {
                    if clean {
                        t.status.remove(ThreadStatus::SIGNAL);
                    }
                    return;
                }
                let signo = deliverable.trailing_zeros() as usize;
                t.signal.pending &= !(1 << signo);
                (signo, t.signal.action(signo))
            };

            match action {
                SignalAction::Handler(handler) => handler(signo as i32),
                SignalAction::Default => {
                    log::debug!("[kestrel] signal {} takes the default action", signo)
                }
                SignalAction::Ignore => {}
            }

            // a handler may block and leave its own error behind
            if let Some(t) = self.lock().threads.get_mut(thread) {
                t.error = error;
            }
        }
    }

    /// Handle signals that arrived while the current thread was switched out
    pub(crate) fn signal_check_current(&self) {
        let thread = {
            let st = self.lock();
            let Some(id) = st.current else {
                return;
            };
            match st.threads.get(id) {
                Some(t)
                    if t.status.contains(ThreadStatus::SIGNAL)
                        && t.signal.frame == SignalFrame::Normal =>
                {
                    id
                }
                _ => return,
            }
        };
        self.signal_handle(thread, true);
    }

    /// Body of [`signal_entry`]: handle, then resume the interrupted context
    pub fn signal_trampoline(&self) {
        let thread = self.lock().current_thread();
        self.signal_handle(thread, false);

        let to = {
            let mut st = self.lock();
            let t = &mut st.threads[thread];
            if let SignalFrame::Redirected { saved_sp } = t.signal.frame {
                t.sp.set(saved_sp);
            }
            t.signal.frame = SignalFrame::Normal;
            t.status.remove(ThreadStatus::SIGNAL);
            t.sp.clone()
        };
        self.port().context_switch_to(&to);
    }

    /// Install `action` for `signo` on the calling thread, returning the
    /// previous action
    pub fn signal_install(&self, signo: i32, action: SignalAction) -> KernelResult<SignalAction> {
        signal_bit(signo)?;
        let mut st = self.lock();
        let thread = st.current_thread();
        let signal = &mut st.threads[thread].signal;
        let mut vectors = match signal.vectors.take() {
            Some(vectors) => vectors,
            None => {
                let mut vectors = Vec::new();
                vectors
                    .try_reserve_exact(SIG_MAX)
                    .map_err(|_| KernelError::NoMemory)?;
                vectors.resize(SIG_MAX, SignalAction::Default);
                vectors
            }
        };
        let previous = core::mem::replace(&mut vectors[signo as usize], action);
        signal.vectors = Some(vectors);
        Ok(previous)
    }

    /// Stop delivering `signo` to the calling thread
    pub fn signal_mask(&self, signo: i32) -> KernelResult<()> {
        let bit = signal_bit(signo)?;
        let mut st = self.lock();
        let thread = st.current_thread();
        st.threads[thread].signal.unmasked &= !bit;
        Ok(())
    }

    /// Allow `signo` on the calling thread, delivering it at once if pending
    pub fn signal_unmask(&self, signo: i32) -> KernelResult<()> {
        let bit = signal_bit(signo)?;
        let (thread, delivery) = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let thread = st.current_thread();
            st.threads[thread].signal.unmasked |= bit;
            (thread, self.signal_deliver(st, thread))
        };
        self.signal_follow_up(thread, delivery);
        Ok(())
    }

    /// Raise `signo` on `thread`
    pub fn thread_kill(&self, thread: ThreadId, signo: i32) -> KernelResult<()> {
        let bit = signal_bit(signo)?;
        let delivery = {
            let mut guard = self.lock();
            let st = &mut *guard;
            log::trace!("[kestrel] raise signal {} on '{}'", signo, st.threads[thread].name);
            st.threads[thread].signal.pending |= bit;
            self.signal_deliver(st, thread)
        };
        self.signal_follow_up(thread, delivery);
        Ok(())
    }

    /// Raised but not yet handled signals of `thread`
    pub fn signal_pending(&self, thread: ThreadId) -> u32 {
        self.lock().threads[thread].signal.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, spawn};
    use crate::{KernelConfig, ThreadCommand, Timeout, WaitPolicy};
    use core::sync::atomic::{AtomicU32, Ordering};
    use kestrel_hal::sim::SwitchKind;

    fn noop(_: i32) {}

    #[test]
    fn test_install_returns_previous_action() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        assert_eq!(
            kernel.signal_install(5, SignalAction::Handler(noop)),
            Ok(SignalAction::Default)
        );
        assert_eq!(
            kernel.signal_install(5, SignalAction::Ignore),
            Ok(SignalAction::Handler(noop))
        );
        assert_eq!(
            kernel.signal_install(0, SignalAction::Ignore),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            kernel.signal_install(SIG_MAX as i32, SignalAction::Ignore),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(kernel.signal_mask(-1), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_masked_signal_waits_for_unmask() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            HITS.fetch_or(1 << signo, Ordering::SeqCst);
        }

        let (_port, kernel, main) = boot(KernelConfig::new());
        kernel.signal_install(3, SignalAction::Handler(record)).unwrap();
        kernel.thread_kill(main, 3).unwrap();
        assert_eq!(HITS.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.signal_pending(main), 1 << 3);

        kernel.signal_unmask(3).unwrap();
        assert_eq!(HITS.load(Ordering::SeqCst), 1 << 3);
        assert_eq!(kernel.signal_pending(main), 0);
        assert!(!kernel.thread_info(main).status.contains(ThreadStatus::SIGNAL));
    }

    #[test]
    fn test_kill_self_runs_handlers_in_order() {
        static ORDER: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            let seen = ORDER.load(Ordering::SeqCst);
            ORDER.store(seen * 100 + signo as u32, Ordering::SeqCst);
        }

        let (_port, kernel, main) = boot(KernelConfig::new());
        for signo in [2, 7] {
            kernel.signal_install(signo, SignalAction::Handler(record)).unwrap();
        }
        kernel.thread_kill(main, 7).unwrap();
        kernel.thread_kill(main, 2).unwrap();
        // both pending but masked so far
        assert_eq!(ORDER.load(Ordering::SeqCst), 0);

        kernel.signal_unmask(7).unwrap();
        assert_eq!(ORDER.load(Ordering::SeqCst), 7);
        kernel.signal_mask(7).unwrap();
        kernel.thread_kill(main, 7).unwrap();
        kernel.signal_unmask(2).unwrap();
        assert_eq!(ORDER.load(Ordering::SeqCst), 702);
        assert_eq!(kernel.signal_pending(main), 1 << 7);
    }

    #[test]
    fn test_kill_blocked_thread_interrupts_its_wait() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            HITS.fetch_or(1 << signo, Ordering::SeqCst);
        }

        let (port, kernel, main) = boot(KernelConfig::new());
        let sem = kernel.sem_create("sig", 0, WaitPolicy::Fifo).unwrap();
        let waiter = spawn(&kernel, "waiter", 4);
        kernel.signal_install(9, SignalAction::Handler(record)).unwrap();
        kernel.signal_unmask(9).unwrap();
        let _ = kernel.sem_take(sem, Timeout::Forever);
        assert_eq!(kernel.thread_self(), Some(main));

        kernel.thread_kill(waiter, 9).unwrap();
        assert_eq!(kernel.thread_self(), Some(waiter));
        // woken straight into the trampoline
        let to_sp = port.last_switch().unwrap().to_sp;
        assert_eq!(port.frame_at(to_sp).unwrap().entry as usize, signal_entry as usize);
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        kernel.signal_trampoline();
        assert_eq!(HITS.load(Ordering::SeqCst), 1 << 9);
        assert_eq!(kernel.thread_error(waiter), Err(KernelError::Interrupted));
        assert_eq!(kernel.ipc_waiting(sem.object()), 0);
        assert!(!kernel.thread_info(waiter).status.contains(ThreadStatus::SIGNAL));
    }

    #[test]
    fn test_kill_ready_thread_redirects_its_stack() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            HITS.fetch_or(1 << signo, Ordering::SeqCst);
        }

        let (port, kernel, main) = boot(KernelConfig::new());
        let target = spawn(&kernel, "target", 4);
        for signo in [4, 6] {
            kernel.signal_install(signo, SignalAction::Handler(record)).unwrap();
            kernel.signal_unmask(signo).unwrap();
        }
        kernel
            .thread_control(target, ThreadCommand::ChangePriority(20))
            .unwrap();
        assert_eq!(kernel.thread_self(), Some(main));

        let saved_sp = kernel.lock().threads[target].sp.get();
        kernel.thread_kill(target, 4).unwrap();
        let redirected = kernel.lock().threads[target].sp.get();
        assert_ne!(redirected, saved_sp);
        let frame = port.frame_at(redirected).unwrap();
        assert_eq!(frame.entry as usize, signal_entry as usize);
        assert_eq!(frame.stack_top, saved_sp - SIGNAL_FRAME_GAP);
        assert_eq!(
            kernel.lock().threads[target].signal.frame,
            SignalFrame::Redirected { saved_sp }
        );

        // a second signal rides on the same frame
        kernel.thread_kill(target, 6).unwrap();
        assert_eq!(kernel.lock().threads[target].sp.get(), redirected);
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        kernel
            .thread_control(target, ThreadCommand::ChangePriority(4))
            .unwrap();
        assert_eq!(kernel.thread_self(), Some(target));
        assert_eq!(port.last_switch().unwrap().to_sp, redirected);
        // the trampoline has not run yet
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        kernel.signal_trampoline();
        assert_eq!(HITS.load(Ordering::SeqCst), (1 << 4) | (1 << 6));
        let last = port.last_switch().unwrap();
        assert_eq!(last.kind, SwitchKind::First);
        assert_eq!(last.to_sp, saved_sp);
        let info = kernel.thread_info(target);
        assert!(!info.status.contains(ThreadStatus::SIGNAL));
        assert_eq!(kernel.lock().threads[target].signal.frame, SignalFrame::Normal);
    }

    #[test]
    fn test_signal_raised_in_interrupt_survives_preemption() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            HITS.fetch_or(1 << signo, Ordering::SeqCst);
        }

        let (port, kernel, main) = boot(KernelConfig::new());
        kernel.signal_install(11, SignalAction::Handler(record)).unwrap();
        kernel.signal_unmask(11).unwrap();
        let other = spawn(&kernel, "other", 4);
        kernel.thread_suspend(other).unwrap();
        assert_eq!(kernel.thread_self(), Some(main));

        kernel.interrupt_enter();
        kernel.thread_kill(main, 11).unwrap();
        kernel.thread_resume(other).unwrap();
        assert_eq!(kernel.thread_self(), Some(other));
        assert_eq!(port.last_switch().unwrap().kind, SwitchKind::Interrupt);
        // main's context is only saved once the handler returns
        assert_eq!(kernel.lock().threads[main].signal.frame, SignalFrame::Normal);
        kernel.interrupt_leave();
        assert_eq!(HITS.load(Ordering::SeqCst), 0);
        assert!(kernel.thread_info(main).status.contains(ThreadStatus::SIGNAL));

        let saved_sp = kernel.lock().threads[main].sp.get();
        kernel.thread_suspend(other).unwrap();
        assert_eq!(kernel.thread_self(), Some(main));
        let last = port.last_switch().unwrap();
        assert_ne!(last.to_sp, saved_sp);
        assert_eq!(port.frame_at(last.to_sp).unwrap().entry as usize, signal_entry as usize);
        assert_eq!(
            kernel.lock().threads[main].signal.frame,
            SignalFrame::Redirected { saved_sp }
        );
        assert_eq!(HITS.load(Ordering::SeqCst), 0);

        kernel.signal_trampoline();
        assert_eq!(HITS.load(Ordering::SeqCst), 1 << 11);
        assert_eq!(port.last_switch().unwrap().to_sp, saved_sp);
        assert!(!kernel.thread_info(main).status.contains(ThreadStatus::SIGNAL));
        assert_eq!(kernel.signal_pending(main), 0);
    }

    #[test]
    fn test_kill_builds_frame_for_thread_flagged_in_interrupt() {
        static HITS: AtomicU32 = AtomicU32::new(0);
        fn record(signo: i32) {
            HITS.fetch_or(1 << signo, Ordering::SeqCst);
        }

        let (port, kernel, main) = boot(KernelConfig::new());
        kernel.signal_install(12, SignalAction::Handler(record)).unwrap();
        kernel.signal_unmask(12).unwrap();

        kernel.interrupt_enter();
        kernel.thread_kill(main, 12).unwrap();
        kernel.interrupt_leave();
        assert!(kernel.thread_info(main).status.contains(ThreadStatus::SIGNAL));
        assert_eq!(kernel.lock().threads[main].signal.frame, SignalFrame::Normal);

        let other = spawn(&kernel, "other", 4);
        assert_eq!(kernel.thread_self(), Some(other));
        let saved_sp = kernel.lock().threads[main].sp.get();
        kernel.thread_kill(main, 12).unwrap();
        let redirected = kernel.lock().threads[main].sp.get();
        assert_eq!(port.frame_at(redirected).unwrap().entry as usize, signal_entry as usize);
        assert_eq!(
            kernel.lock().threads[main].signal.frame,
            SignalFrame::Redirected { saved_sp }
        );

        kernel.thread_suspend(other).unwrap();
        assert_eq!(port.last_switch().unwrap().to_sp, redirected);
        kernel.signal_trampoline();
        assert_eq!(HITS.load(Ordering::SeqCst), 1 << 12);
        assert_eq!(kernel.lock().threads[main].sp.get(), saved_sp);
    }

    #[test]
    fn test_unstarted_thread_only_records_signal() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let fresh = kernel
            .thread_create("fresh", crate::kernel::tests::nop_entry, 0, 512, 5, 0)
            .unwrap();
        kernel.thread_kill(fresh, 1).unwrap();
        assert_eq!(kernel.signal_pending(fresh), 1 << 1);
        assert_eq!(kernel.thread_info(fresh).state, ThreadState::Init);
    }
}
