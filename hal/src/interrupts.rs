//! # Interrupt Masking
//!
//! The kernel's only concurrency hazard on a single core is an interrupt
//! preempting a half-done mutation. This module defines the primitive that
//! closes that window.

/// Opaque interrupt state returned by [`InterruptControl::interrupt_disable`].
///
/// It must be handed back unchanged to [`InterruptControl::interrupt_enable`],
/// which makes nested critical sections restore the outer state correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the saved state must be passed back to interrupt_enable"]
pub struct IrqState(pub usize);

/// Interrupt mask control
pub trait InterruptControl {
    /// Disable interrupts, returning the previous state
    fn interrupt_disable(&self) -> IrqState;

    /// Restore the interrupt state saved by `interrupt_disable`
    fn interrupt_enable(&self, state: IrqState);
}

/// RAII critical section: interrupts stay disabled until the guard drops.
///
/// Generic over the controller so a `&dyn Port` can be used directly.
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    ctl: &'a C,
    state: IrqState,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    /// Disable interrupts on `ctl` until the returned guard is dropped
    pub fn new(ctl: &'a C) -> Self {
        let state = ctl.interrupt_disable();
        Self { ctl, state }
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        self.ctl.interrupt_enable(self.state);
    }
}

impl<C: InterruptControl + ?Sized> core::fmt::Debug for IrqGuard<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqGuard").field("state", &self.state).finish()
    }
}
