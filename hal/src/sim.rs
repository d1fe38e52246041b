//! # Simulation Port
//!
//! A deterministic port that lets the kernel run on a host.
//!
//! Nothing is actually switched: frames are fabricated addresses and every
//! switch is recorded and returns immediately. Tests drive the kernel through
//! its public API and inspect what the port was asked to do.

use crate::context::{ContextSwitch, EntryFn, ExitFn, StackSlot};
use crate::interrupts::{InterruptControl, IrqState};
use crate::{align_stack_down, Port};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

/// Size reserved below `stack_top` for a fabricated initial frame
pub const SIM_FRAME_SIZE: usize = 16 * core::mem::size_of::<usize>();

/// Frame recorded by [`SimPort::stack_init`]
#[derive(Debug, Clone, Copy)]
pub struct SimFrame {
    /// Stack pointer handed back to the kernel
    pub sp: usize,
    /// Entry function
    pub entry: EntryFn,
    /// Entry parameter
    pub parameter: usize,
    /// Requested stack top
    pub stack_top: usize,
    /// Exit function
    pub exit: Option<ExitFn>,
}

/// How a switch was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// `context_switch` from thread context
    Thread,
    /// `context_switch_interrupt`
    Interrupt,
    /// `context_switch_to` (no outgoing thread)
    First,
}

/// Switch recorded by the simulation port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRecord {
    /// Kind of switch
    pub kind: SwitchKind,
    /// Outgoing stack pointer, if any
    pub from_sp: Option<usize>,
    /// Incoming stack pointer
    pub to_sp: usize,
}

/// Host simulation port
#[derive(Debug)]
pub struct SimPort {
    enabled: AtomicBool,
    disables: AtomicUsize,
    frames: Mutex<Vec<SimFrame>>,
    switches: Mutex<Vec<SwitchRecord>>,
}

impl SimPort {
    /// Create a new simulation port with interrupts enabled
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            disables: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    /// Are interrupts currently enabled?
    pub fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of critical sections entered so far
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }

    /// All switches requested so far
    pub fn switches(&self) -> Vec<SwitchRecord> {
        self.switches.lock().clone()
    }

    /// Most recent switch
    pub fn last_switch(&self) -> Option<SwitchRecord> {
        self.switches.lock().last().copied()
    }

    /// Number of switches requested so far
    pub fn switch_count(&self) -> usize {
        self.switches.lock().len()
    }

    /// Frame fabricated for stack pointer `sp`
    pub fn frame_at(&self, sp: usize) -> Option<SimFrame> {
        self.frames.lock().iter().rev().find(|f| f.sp == sp).copied()
    }

    fn record(&self, kind: SwitchKind, from: Option<&StackSlot>, to: &StackSlot) {
        log::trace!("sim: {:?} switch to sp {:#x}", kind, to.get());
        self.switches.lock().push(SwitchRecord {
            kind,
            from_sp: from.map(StackSlot::get),
            to_sp: to.get(),
        });
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for SimPort {
    fn interrupt_disable(&self) -> IrqState {
        self.disables.fetch_add(1, Ordering::Relaxed);
        let was = self.enabled.swap(false, Ordering::SeqCst);
        IrqState(was as usize)
    }

    fn interrupt_enable(&self, state: IrqState) {
        self.enabled.store(state.0 != 0, Ordering::SeqCst);
    }
}

impl ContextSwitch for SimPort {
    fn stack_init(
        &self,
        entry: EntryFn,
        parameter: usize,
        stack_top: usize,
        exit: Option<ExitFn>,
    ) -> usize {
        let sp = align_stack_down(stack_top).saturating_sub(SIM_FRAME_SIZE);
        self.frames.lock().push(SimFrame {
            sp,
            entry,
            parameter,
            stack_top,
            exit,
        });
        sp
    }

    fn context_switch(&self, from: &StackSlot, to: &StackSlot) {
        self.record(SwitchKind::Thread, Some(from), to);
    }

    fn context_switch_interrupt(&self, from: &StackSlot, to: &StackSlot) {
        self.record(SwitchKind::Interrupt, Some(from), to);
    }

    fn context_switch_to(&self, to: &StackSlot) {
        self.record(SwitchKind::First, None, to);
    }
}

impl Port for SimPort {
    fn name(&self) -> &'static str {
        "sim"
    }
}
