//! # Kernel Objects
//!
//! Naming, kind tags and backing storage shared by every object type.

pub mod registry;
pub mod slab;

use crate::config::NAME_MAX;
use crate::ipc::{EventId, MailboxId, MessageQueueId, MutexId, SemaphoreId};
use crate::{KernelError, KernelResult, ThreadId, TimerId};
use alloc::vec::Vec;
use bitflags::bitflags;

/// Fixed-capacity object name
pub type Name = heapless::String<NAME_MAX>;

/// Build a [`Name`], truncating at a character boundary
pub fn make_name(name: &str) -> Name {
    let mut out = Name::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

bitflags! {
    /// Object bookkeeping flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u8 {
        /// Placed by the caller (`*_init`/`*_detach`) rather than created
        /// by the kernel (`*_create`/`*_delete`)
        const STATIC = 1 << 0;
    }
}

/// Kind of a kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Thread
    Thread,
    /// Software timer
    Timer,
    /// Counting semaphore
    Semaphore,
    /// Recursive mutex
    Mutex,
    /// Event flag set
    Event,
    /// Mailbox
    Mailbox,
    /// Message queue
    MessageQueue,
}

/// Typed handle to any kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectHandle {
    /// Thread
    Thread(ThreadId),
    /// Software timer
    Timer(TimerId),
    /// Counting semaphore
    Semaphore(SemaphoreId),
    /// Recursive mutex
    Mutex(MutexId),
    /// Event flag set
    Event(EventId),
    /// Mailbox
    Mailbox(MailboxId),
    /// Message queue
    MessageQueue(MessageQueueId),
}

impl ObjectHandle {
    /// Kind of the referenced object
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectHandle::Thread(_) => ObjectKind::Thread,
            ObjectHandle::Timer(_) => ObjectKind::Timer,
            ObjectHandle::Semaphore(_) => ObjectKind::Semaphore,
            ObjectHandle::Mutex(_) => ObjectKind::Mutex,
            ObjectHandle::Event(_) => ObjectKind::Event,
            ObjectHandle::Mailbox(_) => ObjectKind::Mailbox,
            ObjectHandle::MessageQueue(_) => ObjectKind::MessageQueue,
        }
    }
}

/// Memory behind a stack or a message pool
#[derive(Debug)]
pub enum Storage<T: 'static> {
    /// Allocated by the kernel, freed with the object
    Owned(Vec<T>),
    /// Supplied by the caller for the whole uptime
    Static(&'static mut [T]),
}

impl<T: Clone + 'static> Storage<T> {
    /// Allocate `len` elements set to `fill`
    pub fn allocate(len: usize, fill: T) -> KernelResult<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| KernelError::NoMemory)?;
        buf.resize(len, fill);
        Ok(Storage::Owned(buf))
    }
}

impl<T: 'static> Storage<T> {
    /// Element view
    pub fn as_slice(&self) -> &[T] {
        match self {
            Storage::Owned(buf) => buf,
            Storage::Static(buf) => buf,
        }
    }

    /// Mutable element view
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Storage::Owned(buf) => buf,
            Storage::Static(buf) => buf,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Is the storage empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Was the storage supplied by the caller?
    pub fn is_static(&self) -> bool {
        matches!(self, Storage::Static(_))
    }
}
