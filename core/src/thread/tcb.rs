//! # Thread Control Block
//!
//! Core thread data structure.

use super::{ThreadState, ThreadStatus};
use crate::ipc::EventOption;
use crate::list::Link;
use crate::object::{Name, ObjectFlags, Storage};
use crate::scheduler::priority::PriorityMask;
use crate::signal::SignalState;
use crate::{KernelResult, ObjectId, ThreadId, TimerId};
use alloc::sync::Arc;
use kestrel_hal::{EntryFn, StackSlot};

/// List a thread's `tlist` link is currently on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queue {
    /// Not linked
    None,
    /// Its ready-queue level
    Ready,
    /// A wait queue of an IPC object (`senders` selects the sender queue)
    Wait { object: ObjectId, senders: bool },
    /// The defunct list
    Defunct,
}

/// Thread control block
#[derive(Debug)]
pub(crate) struct Thread {
    pub(crate) name: Name,
    pub(crate) flags: ObjectFlags,
    pub(crate) entry: EntryFn,
    pub(crate) parameter: usize,
    pub(crate) stack: Storage<u8>,
    /// Saved stack pointer, shared with the port during a switch
    pub(crate) sp: Arc<StackSlot>,

    pub(crate) init_priority: u8,
    pub(crate) current_priority: u8,
    pub(crate) mask: PriorityMask,

    pub(crate) state: ThreadState,
    pub(crate) status: ThreadStatus,
    /// Result of the last blocking operation
    pub(crate) error: KernelResult<()>,

    pub(crate) init_tick: u32,
    pub(crate) remaining_tick: u32,
    /// Sleep and wait timeout timer
    pub(crate) timer: TimerId,

    pub(crate) tlist: Link<ThreadId>,
    pub(crate) queued_on: Queue,

    /// Requested bits while waiting on an event; matched bits once woken
    pub(crate) event_set: u32,
    pub(crate) event_info: EventOption,

    pub(crate) signal: SignalState,

    pub(crate) cleanup: Option<fn(ThreadId)>,
    pub(crate) user_data: usize,
}

/// Parameters of a new thread
pub(crate) struct ThreadParams {
    pub(crate) name: Name,
    pub(crate) flags: ObjectFlags,
    pub(crate) entry: EntryFn,
    pub(crate) parameter: usize,
    pub(crate) stack: Storage<u8>,
    pub(crate) sp: usize,
    pub(crate) priority: u8,
    pub(crate) tick: u32,
}

impl Thread {
    pub(crate) fn new(params: ThreadParams, timer: TimerId) -> Self {
        Self {
            name: params.name,
            flags: params.flags,
            entry: params.entry,
            parameter: params.parameter,
            stack: params.stack,
            sp: Arc::new(StackSlot::new(params.sp)),
            init_priority: params.priority,
            current_priority: params.priority,
            mask: PriorityMask::default(),
            state: ThreadState::Init,
            status: ThreadStatus::empty(),
            error: Ok(()),
            init_tick: params.tick,
            remaining_tick: params.tick,
            timer,
            tlist: Link::new(),
            queued_on: Queue::None,
            event_set: 0,
            event_info: EventOption::empty(),
            signal: SignalState::new(),
            cleanup: None,
            user_data: 0,
        }
    }

    /// Is this thread caller-placed?
    pub(crate) fn is_static(&self) -> bool {
        self.flags.contains(ObjectFlags::STATIC)
    }

    /// Bytes at the bottom of the stack that were never written
    pub(crate) fn stack_unused(&self) -> usize {
        self.stack
            .as_slice()
            .iter()
            .take_while(|&&b| b == b'#')
            .count()
    }

    pub(crate) fn info(&self) -> ThreadInfo {
        ThreadInfo {
            name: self.name.clone(),
            state: self.state,
            status: self.status,
            init_priority: self.init_priority,
            current_priority: self.current_priority,
            init_tick: self.init_tick,
            remaining_tick: self.remaining_tick,
            stack_size: self.stack.len(),
            stack_unused: self.stack_unused(),
            error: self.error,
            is_static: self.is_static(),
            user_data: self.user_data,
        }
    }
}

/// Snapshot of a thread
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    /// Thread name
    pub name: Name,
    /// State
    pub state: ThreadState,
    /// Status bits
    pub status: ThreadStatus,
    /// Priority given at creation
    pub init_priority: u8,
    /// Effective priority (may be boosted)
    pub current_priority: u8,
    /// Time slice
    pub init_tick: u32,
    /// Ticks left in the current slice
    pub remaining_tick: u32,
    /// Stack size in bytes
    pub stack_size: usize,
    /// Stack bytes never touched (high-water mark)
    pub stack_unused: usize,
    /// Last recorded error
    pub error: KernelResult<()>,
    /// Caller-placed thread
    pub is_static: bool,
    /// User data word
    pub user_data: usize,
}
