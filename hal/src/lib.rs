//! # Kestrel HAL - Port Interface
//!
//! This crate defines the contract between the Kestrel kernel core and the
//! board/CPU it runs on. The kernel never touches hardware directly; every
//! interrupt mask change, stack frame and context switch goes through a
//! [`Port`].
//!
//! ## Design Philosophy
//!
//! The port interface is designed to be:
//! - **Minimal**: only what a single-core scheduler needs
//! - **Object safe**: the kernel holds the port as `&dyn Port`
//! - **Simulatable**: [`sim::SimPort`] runs the whole kernel on a host

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod context;
pub mod interrupts;
pub mod sim;

pub use context::{ContextSwitch, EntryFn, ExitFn, StackSlot};
pub use interrupts::{InterruptControl, IrqGuard, IrqState};

/// Everything the kernel core consumes from the hardware.
///
/// A port is a zero-sized or tiny object living for the whole uptime of the
/// kernel. Implementations must be callable from both thread and interrupt
/// context.
pub trait Port: InterruptControl + ContextSwitch + Send + Sync + 'static {
    /// Get the port name
    fn name(&self) -> &'static str;
}

/// Required alignment of an initial stack pointer
pub const STACK_ALIGN: usize = 8;

/// Align a stack address down to [`STACK_ALIGN`]
#[inline]
pub const fn align_stack_down(addr: usize) -> usize {
    addr & !(STACK_ALIGN - 1)
}
