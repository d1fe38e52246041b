//! # Thread States
//!
//! Thread state machine definition.

use bitflags::bitflags;

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ThreadState {
    /// Created, not yet started
    #[default]
    Init = 0,
    /// On the ready queue
    Ready = 1,
    /// Blocked, sleeping, or explicitly suspended
    Suspended = 2,
    /// The thread the CPU is executing
    Running = 3,
    /// Terminated
    Close = 4,
}

impl ThreadState {
    /// Check if thread can be scheduled
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Running)
    }

    /// Check if thread is terminated
    pub fn is_closed(&self) -> bool {
        matches!(self, ThreadState::Close)
    }

    /// Valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [ThreadState] {
        match self {
            ThreadState::Init => &[ThreadState::Suspended, ThreadState::Close],
            ThreadState::Ready => &[
                ThreadState::Running,
                ThreadState::Suspended,
                ThreadState::Close,
            ],
            ThreadState::Running => &[
                ThreadState::Ready,
                ThreadState::Suspended,
                ThreadState::Close,
            ],
            ThreadState::Suspended => &[ThreadState::Ready, ThreadState::Close],
            ThreadState::Close => &[],
        }
    }

    /// Can a thread move from this state to `to`?
    pub fn can_transition_to(&self, to: ThreadState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

bitflags! {
    /// Status bits layered over [`ThreadState`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadStatus: u8 {
        /// Signal delivery in progress; cleared once handlers have run
        const SIGNAL = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(ThreadState::Init.can_transition_to(ThreadState::Suspended));
        assert!(!ThreadState::Init.can_transition_to(ThreadState::Ready));
        assert!(ThreadState::Suspended.can_transition_to(ThreadState::Ready));
        assert!(ThreadState::Close.valid_transitions().is_empty());
    }

    #[test]
    fn test_runnable() {
        assert!(ThreadState::Ready.is_runnable());
        assert!(ThreadState::Running.is_runnable());
        assert!(!ThreadState::Suspended.is_runnable());
        assert!(ThreadState::Close.is_closed());
    }
}
