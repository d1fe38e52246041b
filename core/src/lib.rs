//! # Kestrel Kernel Core
//!
//! The scheduling and synchronization core of the Kestrel real-time kernel:
//! - Thread control blocks and the thread state machine
//! - O(1) priority ready queue with round-robin time slices
//! - Tick clock and skip-list software timers
//! - Wait queues, semaphores, mutexes, events, mailboxes, message queues
//! - Per-thread signals
//!
//! ## Key Principle
//!
//! All kernel state lives in one [`Kernel`] value. Every mutation happens
//! with interrupts disabled and the state lock held; the scheduler and user
//! callbacks only ever run after both are released.
//!
//! Hardware access goes through a [`kestrel_hal::Port`]. The simulation port
//! runs the whole core on a host for testing.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

/// Define a typed slab handle
macro_rules! kernel_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(crate::object::slab::Key);

        impl crate::object::slab::SlabKey for $name {
            fn from_key(key: crate::object::slab::Key) -> Self {
                Self(key)
            }

            fn key(self) -> crate::object::slab::Key {
                self.0
            }
        }

        impl $name {
            /// Slot index, stable for the object's lifetime
            pub fn index(self) -> u32 {
                self.0.index()
            }
        }
    };
}

pub mod clock;
pub mod config;
pub mod ipc;
pub mod kernel;
pub mod list;
pub mod object;
pub mod scheduler;
pub mod signal;
pub mod thread;
pub mod timer;

pub use config::KernelConfig;
pub use ipc::{
    EventCommand, EventId, EventOption, MailboxCommand, MailboxId, MessageQueueCommand,
    MessageQueueId, MutexId, SemaphoreCommand, SemaphoreId, WaitPolicy,
};
pub use kernel::{Hooks, Kernel};
pub use object::{ObjectHandle, ObjectKind};
pub use signal::{signal_entry, SignalAction};
pub use thread::{ThreadCommand, ThreadInfo, ThreadState, ThreadStatus};
pub use timer::{TimerCommand, TimerFlags};

use core::fmt;
use kestrel_hal::Port;

kernel_id! {
    /// Handle to a thread
    ThreadId
}

kernel_id! {
    /// Handle to a software timer
    TimerId
}

kernel_id! {
    /// Handle to an IPC object of any kind
    ObjectId
}

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Recoverable kernel errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Generic failure
    Error,
    /// Timed out, or not available with a zero timeout
    Timeout,
    /// Resource is full
    Full,
    /// Resource is empty
    Empty,
    /// Out of memory
    NoMemory,
    /// Operation not supported
    Unsupported,
    /// Resource busy
    Busy,
    /// I/O error
    Io,
    /// Wait interrupted before completion
    Interrupted,
    /// Invalid argument
    InvalidArgument,
    /// Object deleted or reset while waiting on it
    Aborted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::Error => "generic error",
            KernelError::Timeout => "timed out",
            KernelError::Full => "resource full",
            KernelError::Empty => "resource empty",
            KernelError::NoMemory => "out of memory",
            KernelError::Unsupported => "operation not supported",
            KernelError::Busy => "resource busy",
            KernelError::Io => "i/o error",
            KernelError::Interrupted => "wait interrupted",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::Aborted => "wait aborted",
        };
        f.write_str(msg)
    }
}

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until the resource becomes available
    Forever,
    /// Fail at once if the resource is not available
    NoWait,
    /// Block at most this many ticks
    Ticks(u32),
}

impl Timeout {
    /// Timeout of `ticks` ticks, zero meaning no wait
    pub const fn from_ticks(ticks: u32) -> Self {
        if ticks == 0 {
            Timeout::NoWait
        } else {
            Timeout::Ticks(ticks)
        }
    }

    /// Timeout left after `elapsed` ticks have passed
    pub fn remaining(self, elapsed: u32) -> Self {
        match self {
            Timeout::Ticks(ticks) => Timeout::from_ticks(ticks.saturating_sub(elapsed)),
            other => other,
        }
    }

    /// Is this a non-blocking attempt?
    pub fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }
}

impl From<i32> for Timeout {
    /// Negative waits forever, zero does not wait, positive counts ticks
    fn from(ticks: i32) -> Self {
        if ticks < 0 {
            Timeout::Forever
        } else {
            Timeout::from_ticks(ticks as u32)
        }
    }
}

/// Report a kernel contract violation and stop.
///
/// Contract violations (stale handles, wrong object type, a transition from
/// the wrong state) are logic errors in the caller and are never returned as
/// a [`KernelError`].
#[cold]
#[track_caller]
pub fn contract_violation(what: &str) -> ! {
    log::error!("[kestrel] contract violation: {}", what);
    panic!("contract violation: {}", what)
}

/// The system kernel
static KERNEL: spin::Once<Kernel> = spin::Once::new();

/// Bring up the system kernel.
///
/// Must run once, before the tick interrupt is enabled and before any thread
/// is started. A second call fails with [`KernelError::Busy`].
pub fn init(port: &'static dyn Port, config: KernelConfig) -> KernelResult<&'static Kernel> {
    if KERNEL.is_completed() {
        return Err(KernelError::Busy);
    }
    let kernel = Kernel::new(port, config)?;
    Ok(KERNEL.call_once(|| kernel))
}

/// Get the system kernel
pub fn kernel() -> &'static Kernel {
    match KERNEL.get() {
        Some(kernel) => kernel,
        None => contract_violation("kernel used before init"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_from_i32() {
        assert_eq!(Timeout::from(-1), Timeout::Forever);
        assert_eq!(Timeout::from(0), Timeout::NoWait);
        assert_eq!(Timeout::from(25), Timeout::Ticks(25));
    }

    #[test]
    fn test_timeout_remaining() {
        assert_eq!(Timeout::Ticks(10).remaining(4), Timeout::Ticks(6));
        assert_eq!(Timeout::Ticks(10).remaining(12), Timeout::NoWait);
        assert_eq!(Timeout::Forever.remaining(100), Timeout::Forever);
        assert!(Timeout::Ticks(0).is_no_wait());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(alloc::format!("{}", KernelError::Aborted), "wait aborted");
        assert_eq!(alloc::format!("{}", KernelError::Timeout), "timed out");
    }
}
