//! # Context Switching
//!
//! Stack-frame construction and context switch primitives.
//!
//! The kernel decides *which* thread runs; the port decides *how*. A thread's
//! whole CPU state lives on its own stack, so the only thing the kernel keeps
//! per thread is the saved stack pointer held in a [`StackSlot`].

use core::sync::atomic::{AtomicUsize, Ordering};

/// Thread entry point, called with the thread parameter
pub type EntryFn = fn(usize);

/// Function a thread returns into when its entry function returns
pub type ExitFn = fn();

/// Saved stack pointer of a thread.
///
/// The port writes the outgoing thread's stack pointer into the `from` slot
/// and loads the incoming one from the `to` slot. The kernel keeps slots
/// behind `Arc` so that they stay valid for the duration of a switch even
/// after the kernel lock is released.
#[derive(Debug, Default)]
pub struct StackSlot(AtomicUsize);

impl StackSlot {
    /// Create a slot holding `sp`
    pub const fn new(sp: usize) -> Self {
        Self(AtomicUsize::new(sp))
    }

    /// Read the saved stack pointer
    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Overwrite the saved stack pointer
    #[inline]
    pub fn set(&self, sp: usize) {
        self.0.store(sp, Ordering::Release);
    }

    /// Raw pointer to the slot, for assembly switch routines
    #[inline]
    pub fn as_ptr(&self) -> *mut usize {
        self.0.as_ptr()
    }
}

/// Context switch abstraction
pub trait ContextSwitch {
    /// Build the initial frame of a thread.
    ///
    /// The frame makes the thread start in `entry(parameter)` and, when entry
    /// returns, continue in `exit`. Returns the stack pointer to store in the
    /// thread's [`StackSlot`]. `stack_top` is the highest usable address.
    fn stack_init(
        &self,
        entry: EntryFn,
        parameter: usize,
        stack_top: usize,
        exit: Option<ExitFn>,
    ) -> usize;

    /// Switch from thread context.
    ///
    /// Saves the current stack pointer into `from` and resumes the thread
    /// whose stack pointer is in `to`. On hardware this returns only when the
    /// `from` thread is scheduled again.
    fn context_switch(&self, from: &StackSlot, to: &StackSlot);

    /// Request a switch from interrupt context.
    ///
    /// The switch is performed on interrupt exit; this call returns at once.
    fn context_switch_interrupt(&self, from: &StackSlot, to: &StackSlot);

    /// Load the first thread. Never returns on hardware.
    fn context_switch_to(&self, to: &StackSlot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_slot_roundtrip() {
        let slot = StackSlot::new(0x2000);
        assert_eq!(slot.get(), 0x2000);
        slot.set(0x1ff0);
        assert_eq!(slot.get(), 0x1ff0);
        // SAFETY: the slot is alive and nothing else accesses it.
        unsafe { *slot.as_ptr() = 0x1f00 };
        assert_eq!(slot.get(), 0x1f00);
    }
}
