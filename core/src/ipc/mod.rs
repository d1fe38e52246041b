//! # Inter-Thread Communication
//!
//! Semaphores, mutexes, event sets, mailboxes and message queues.
//!
//! Every primitive is an [`IpcObject`]: a name, a wait policy and two wait
//! queues (`waiters` for takers and receivers, `senders` for threads blocked
//! on a full mailbox or queue) around a kind-specific payload. Objects live
//! in one slab; the typed handles below keep the kinds apart at the API.

pub mod event;
pub mod mailbox;
pub mod msgqueue;
pub mod mutex;
pub mod semaphore;
pub mod waitqueue;

pub use event::{EventCommand, EventOption};
pub use mailbox::MailboxCommand;
pub use msgqueue::MessageQueueCommand;
pub use semaphore::SemaphoreCommand;

use crate::kernel::KernelState;
use crate::list::List;
use crate::object::{make_name, Name, ObjectFlags, ObjectHandle, ObjectKind};
use crate::{contract_violation, Kernel, KernelResult, ObjectId, ThreadId};

/// Order in which blocked threads are woken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Arrival order
    #[default]
    Fifo,
    /// Most urgent first, arrival order among equals
    Priority,
}

/// Define a typed IPC handle
macro_rules! ipc_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) ObjectId);

        impl $name {
            /// Untyped object id
            pub fn object(self) -> ObjectId {
                self.0
            }
        }
    };
}

ipc_id! {
    /// Handle to a semaphore
    SemaphoreId
}

ipc_id! {
    /// Handle to a mutex
    MutexId
}

ipc_id! {
    /// Handle to an event set
    EventId
}

ipc_id! {
    /// Handle to a mailbox
    MailboxId
}

ipc_id! {
    /// Handle to a message queue
    MessageQueueId
}

/// Kind-specific payload of an IPC object
#[derive(Debug)]
pub(crate) enum IpcKind {
    Semaphore(semaphore::Semaphore),
    Mutex(mutex::Mutex),
    Event(event::Event),
    Mailbox(mailbox::Mailbox),
    MessageQueue(msgqueue::MessageQueue),
}

impl IpcKind {
    pub(crate) fn object_kind(&self) -> ObjectKind {
        match self {
            IpcKind::Semaphore(_) => ObjectKind::Semaphore,
            IpcKind::Mutex(_) => ObjectKind::Mutex,
            IpcKind::Event(_) => ObjectKind::Event,
            IpcKind::Mailbox(_) => ObjectKind::Mailbox,
            IpcKind::MessageQueue(_) => ObjectKind::MessageQueue,
        }
    }

    /// Registry handle of object `id` holding this payload
    pub(crate) fn handle(&self, id: ObjectId) -> ObjectHandle {
        match self {
            IpcKind::Semaphore(_) => ObjectHandle::Semaphore(SemaphoreId(id)),
            IpcKind::Mutex(_) => ObjectHandle::Mutex(MutexId(id)),
            IpcKind::Event(_) => ObjectHandle::Event(EventId(id)),
            IpcKind::Mailbox(_) => ObjectHandle::Mailbox(MailboxId(id)),
            IpcKind::MessageQueue(_) => ObjectHandle::MessageQueue(MessageQueueId(id)),
        }
    }
}

/// An IPC object
#[derive(Debug)]
pub(crate) struct IpcObject {
    pub(crate) name: Name,
    pub(crate) flags: ObjectFlags,
    pub(crate) policy: WaitPolicy,
    /// Takers and receivers
    pub(crate) waiters: List<ThreadId>,
    /// Senders blocked on a full mailbox or queue
    pub(crate) senders: List<ThreadId>,
    pub(crate) kind: IpcKind,
}

impl KernelState {
    /// Object `id`, which must be of `kind`
    #[track_caller]
    pub(crate) fn ipc_object(&mut self, id: ObjectId, kind: ObjectKind) -> &mut IpcObject {
        let object = &mut self.ipc[id];
        if object.kind.object_kind() != kind {
            contract_violation("object handle of the wrong kind");
        }
        object
    }
}

impl Kernel {
    /// Register a new IPC object
    pub(crate) fn ipc_create(
        &self,
        name: &str,
        flags: ObjectFlags,
        policy: WaitPolicy,
        kind: IpcKind,
    ) -> KernelResult<ObjectId> {
        let name = make_name(name);
        let object_kind = kind.object_kind();
        let object = IpcObject {
            name: name.clone(),
            flags,
            policy,
            waiters: List::new(),
            senders: List::new(),
            kind,
        };

        let mut guard = self.lock();
        let st = &mut *guard;
        let id = st.ipc.insert(object)?;
        let handle = st.ipc[id].kind.handle(id);
        if let Err(err) = st.registry.register(&name, handle) {
            let released = st.ipc.remove(id);
            drop(guard);
            drop(released);
            return Err(err);
        }
        log::debug!("[kestrel] {:?} '{}' initialized", object_kind, name);
        Ok(id)
    }

    /// Tear down an IPC object, waking every waiter with `Aborted`.
    ///
    /// `is_static` selects detach (true) or delete (false); using the wrong
    /// one for the object is a contract violation.
    pub(crate) fn ipc_destroy(
        &self,
        id: ObjectId,
        kind: ObjectKind,
        is_static: bool,
    ) -> KernelResult<()> {
        let (woken, released) = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let object = st.ipc_object(id, kind);
            if object.flags.contains(ObjectFlags::STATIC) != is_static {
                contract_violation("object torn down with the wrong call");
            }
            let name = object.name.clone();
            let handle = object.kind.handle(id);

            let woken = st.wake_all(id, false) + st.wake_all(id, true);
            st.registry.unregister(&name, handle);
            log::debug!("[kestrel] {:?} '{}' removed, {} waiters aborted", kind, name, woken);
            (woken, st.ipc.remove(id))
        };
        drop(released);
        if woken > 0 {
            self.schedule();
        }
        Ok(())
    }

    /// Number of threads blocked on `object`, senders included
    pub fn ipc_waiting(&self, object: ObjectId) -> usize {
        let st = self.lock();
        let object = &st.ipc[object];
        object.waiters.len() + object.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::sim_kernel;
    use crate::KernelConfig;

    #[test]
    fn test_names_are_shared_across_kinds() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        let sem = kernel.sem_create("shared", 0, WaitPolicy::Fifo).unwrap();
        assert_eq!(
            kernel.event_create("shared", WaitPolicy::Fifo).err(),
            Some(crate::KernelError::Busy)
        );
        assert_eq!(kernel.object_find("shared"), Some(ObjectHandle::Semaphore(sem)));

        kernel.sem_delete(sem).unwrap();
        assert!(kernel.event_create("shared", WaitPolicy::Fifo).is_ok());
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_wrong_kind_is_fatal() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        let sem = kernel.sem_create("s", 1, WaitPolicy::Fifo).unwrap();
        let _ = kernel.event_send(EventId(sem.object()), 1);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_delete_of_static_object_is_fatal() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        let sem = kernel.sem_init("s", 1, WaitPolicy::Fifo).unwrap();
        let _ = kernel.sem_delete(sem);
    }
}
