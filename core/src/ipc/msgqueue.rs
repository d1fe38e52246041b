//! # Message Queues
//!
//! Fixed-size message slots carved out of one pool.
//!
//! Free and queued slots sit on two intrusive lists threaded through a
//! per-slot node table, so sending, urgent sending and receiving are all
//! constant time.

use super::{IpcKind, IpcObject, MessageQueueId, WaitPolicy};
use crate::list::{Link, Links, List};
use crate::object::{ObjectFlags, ObjectKind, Storage};
use crate::{contract_violation, Kernel, KernelError, KernelResult, Timeout};
use alloc::vec::Vec;

/// Message queue control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQueueCommand {
    /// Drop every queued message and abort every blocked thread
    Reset,
}

/// Round `size` up to pointer alignment
const fn align_msg(size: usize) -> Option<usize> {
    let align = core::mem::size_of::<usize>();
    match size.checked_add(align - 1) {
        Some(padded) => Some(padded & !(align - 1)),
        None => None,
    }
}

#[derive(Debug, Clone, Copy)]
struct MsgNode {
    link: Link<u16>,
    len: usize,
}

#[derive(Debug)]
struct Nodes(Vec<MsgNode>);

impl Links<u16> for Nodes {
    fn link(&self, id: u16) -> &Link<u16> {
        &self.0[id as usize].link
    }

    fn link_mut(&mut self, id: u16) -> &mut Link<u16> {
        &mut self.0[id as usize].link
    }
}

/// Message queue payload
#[derive(Debug)]
pub(crate) struct MessageQueue {
    pool: Storage<u8>,
    msg_size: usize,
    nodes: Nodes,
    queue: List<u16>,
    free: List<u16>,
}

impl MessageQueue {
    fn new(pool: Storage<u8>, msg_size: usize) -> KernelResult<Self> {
        let count = pool.len() / msg_size;
        if count == 0 || count > u16::MAX as usize {
            return Err(KernelError::InvalidArgument);
        }

        let mut nodes = Vec::new();
        nodes
            .try_reserve_exact(count)
            .map_err(|_| KernelError::NoMemory)?;
        nodes.resize(
            count,
            MsgNode {
                link: Link::new(),
                len: 0,
            },
        );
        let mut mq = Self {
            pool,
            msg_size,
            nodes: Nodes(nodes),
            queue: List::new(),
            free: List::new(),
        };
        for slot in 0..count as u16 {
            mq.free.push_back(&mut mq.nodes, slot);
        }
        Ok(mq)
    }

    fn entry(&self) -> u16 {
        self.queue.len() as u16
    }

    fn push(&mut self, data: &[u8], urgent: bool) -> bool {
        let Some(slot) = self.free.pop_front(&mut self.nodes) else {
            return false;
        };
        let start = slot as usize * self.msg_size;
        self.pool.as_mut_slice()[start..start + data.len()].copy_from_slice(data);
        self.nodes.0[slot as usize].len = data.len();
        if urgent {
            self.queue.push_front(&mut self.nodes, slot);
        } else {
            self.queue.push_back(&mut self.nodes, slot);
        }
        true
    }

    /// Copy the oldest message into `buf`, truncating, and return its length
    fn pop(&mut self, buf: &mut [u8]) -> Option<usize> {
        let slot = self.queue.pop_front(&mut self.nodes)?;
        let start = slot as usize * self.msg_size;
        let len = self.nodes.0[slot as usize].len.min(buf.len());
        buf[..len].copy_from_slice(&self.pool.as_slice()[start..start + len]);
        self.free.push_back(&mut self.nodes, slot);
        Some(len)
    }

    fn reset(&mut self) {
        while let Some(slot) = self.queue.pop_front(&mut self.nodes) {
            self.free.push_back(&mut self.nodes, slot);
        }
    }
}

impl IpcObject {
    #[track_caller]
    pub(crate) fn msgqueue(&mut self) -> &mut MessageQueue {
        match &mut self.kind {
            IpcKind::MessageQueue(mq) => mq,
            _ => contract_violation("object is not a message queue"),
        }
    }
}

impl Kernel {
    /// Initialize a message queue over a caller-supplied pool.
    ///
    /// The pool holds as many messages of `msg_size` (rounded up to pointer
    /// alignment) as fit.
    pub fn mq_init(
        &self,
        name: &str,
        pool: &'static mut [u8],
        msg_size: usize,
        policy: WaitPolicy,
    ) -> KernelResult<MessageQueueId> {
        let msg_size = match align_msg(msg_size) {
            Some(size) if size > 0 => size,
            _ => return Err(KernelError::InvalidArgument),
        };
        let mq = MessageQueue::new(Storage::Static(pool), msg_size)?;
        self.ipc_create(name, ObjectFlags::STATIC, policy, IpcKind::MessageQueue(mq))
            .map(MessageQueueId)
    }

    /// Create a message queue of `max_msgs` messages of `msg_size` bytes
    pub fn mq_create(
        &self,
        name: &str,
        msg_size: usize,
        max_msgs: u16,
        policy: WaitPolicy,
    ) -> KernelResult<MessageQueueId> {
        let msg_size = match align_msg(msg_size) {
            Some(size) if size > 0 => size,
            _ => return Err(KernelError::InvalidArgument),
        };
        let pool_size = msg_size
            .checked_mul(max_msgs as usize)
            .ok_or(KernelError::NoMemory)?;
        let mq = MessageQueue::new(Storage::allocate(pool_size, 0)?, msg_size)?;
        self.ipc_create(name, ObjectFlags::empty(), policy, IpcKind::MessageQueue(mq))
            .map(MessageQueueId)
    }

    /// Release a message queue made by [`Kernel::mq_init`]
    pub fn mq_detach(&self, mq: MessageQueueId) -> KernelResult<()> {
        self.ipc_destroy(mq.0, ObjectKind::MessageQueue, true)
    }

    /// Free a message queue made by [`Kernel::mq_create`]
    pub fn mq_delete(&self, mq: MessageQueueId) -> KernelResult<()> {
        self.ipc_destroy(mq.0, ObjectKind::MessageQueue, false)
    }

    /// Send without blocking. Fails with `Full`.
    pub fn mq_send(&self, mq: MessageQueueId, data: &[u8]) -> KernelResult<()> {
        self.mq_send_wait(mq, data, Timeout::NoWait)
    }

    /// Send, blocking up to `timeout` while every slot is used
    pub fn mq_send_wait(&self, mq: MessageQueueId, data: &[u8], timeout: Timeout) -> KernelResult<()> {
        let mut timeout = timeout;
        loop {
            let (thread, start) = {
                let mut guard = self.lock();
                let st = &mut *guard;
                let queue = st.ipc_object(mq.0, ObjectKind::MessageQueue).msgqueue();
                if data.len() > queue.msg_size {
                    return Err(KernelError::InvalidArgument);
                }
                if queue.push(data, false) {
                    let woke = st.wake_one(mq.0, false).is_some();
                    drop(guard);
                    if woke {
                        self.schedule();
                    }
                    return Ok(());
                }
                if timeout.is_no_wait() {
                    let result = Err(KernelError::Full);
                    st.record_result(&result);
                    return result;
                }
                let thread = st.current_thread();
                st.pend(thread, mq.0, true, timeout)?;
                (thread, st.tick)
            };
            timeout = self.wait_again(thread, start, timeout)?;
        }
    }

    /// Send ahead of every queued message, without blocking
    pub fn mq_urgent(&self, mq: MessageQueueId, data: &[u8]) -> KernelResult<()> {
        let woke = {
            let mut guard = self.lock();
            let st = &mut *guard;
            let queue = st.ipc_object(mq.0, ObjectKind::MessageQueue).msgqueue();
            if data.len() > queue.msg_size {
                return Err(KernelError::InvalidArgument);
            }
            if !queue.push(data, true) {
                let result = Err(KernelError::Full);
                st.record_result(&result);
                return result;
            }
            st.wake_one(mq.0, false).is_some()
        };
        if woke {
            self.schedule();
        }
        Ok(())
    }

    /// Receive the oldest message into `buf`, blocking up to `timeout`.
    ///
    /// Returns the number of bytes copied; a short `buf` truncates.
    pub fn mq_recv(&self, mq: MessageQueueId, buf: &mut [u8], timeout: Timeout) -> KernelResult<usize> {
        let mut timeout = timeout;
        loop {
            let (thread, start) = {
                let mut guard = self.lock();
                let st = &mut *guard;
                let queue = st.ipc_object(mq.0, ObjectKind::MessageQueue).msgqueue();
                if let Some(len) = queue.pop(buf) {
                    let woke = st.wake_one(mq.0, true).is_some();
                    drop(guard);
                    if woke {
                        self.schedule();
                    }
                    return Ok(len);
                }
                if timeout.is_no_wait() {
                    let result = Err(KernelError::Timeout);
                    st.record_result(&result);
                    return result;
                }
                let thread = st.current_thread();
                st.pend(thread, mq.0, false, timeout)?;
                (thread, st.tick)
            };
            timeout = self.wait_again(thread, start, timeout)?;
        }
    }

    /// Control a message queue
    pub fn mq_control(&self, mq: MessageQueueId, cmd: MessageQueueCommand) -> KernelResult<()> {
        match cmd {
            MessageQueueCommand::Reset => {
                let woken = {
                    let mut st = self.lock();
                    st.ipc_object(mq.0, ObjectKind::MessageQueue).msgqueue().reset();
                    st.wake_all(mq.0, false) + st.wake_all(mq.0, true)
                };
                if woken > 0 {
                    self.schedule();
                }
                Ok(())
            }
        }
    }

    /// Number of queued messages
    pub fn mq_entry(&self, mq: MessageQueueId) -> u16 {
        self.lock()
            .ipc_object(mq.0, ObjectKind::MessageQueue)
            .msgqueue()
            .entry()
    }

    /// Slot size in bytes, after alignment
    pub fn mq_msg_size(&self, mq: MessageQueueId) -> usize {
        self.lock()
            .ipc_object(mq.0, ObjectKind::MessageQueue)
            .msgqueue()
            .msg_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{boot, sim_kernel, spawn};
    use crate::KernelConfig;
    use alloc::boxed::Box;
    use alloc::vec;

    #[test]
    fn test_send_recv_in_order() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let mq = kernel.mq_create("mq", 6, 4, WaitPolicy::Fifo).unwrap();
        assert_eq!(kernel.mq_msg_size(mq), 8);

        kernel.mq_send(mq, b"one").unwrap();
        kernel.mq_send(mq, b"two!").unwrap();
        assert_eq!(kernel.mq_entry(mq), 2);

        let mut buf = [0u8; 8];
        assert_eq!(kernel.mq_recv(mq, &mut buf, Timeout::NoWait), Ok(3));
        assert_eq!(&buf[..3], b"one");
        assert_eq!(kernel.mq_recv(mq, &mut buf, Timeout::NoWait), Ok(4));
        assert_eq!(&buf[..4], b"two!");
        assert_eq!(
            kernel.mq_recv(mq, &mut buf, Timeout::NoWait),
            Err(KernelError::Timeout)
        );
    }

    #[test]
    fn test_urgent_jumps_the_queue() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let mq = kernel.mq_create("mq", 4, 3, WaitPolicy::Fifo).unwrap();
        kernel.mq_send(mq, &[1]).unwrap();
        kernel.mq_send(mq, &[2]).unwrap();
        kernel.mq_urgent(mq, &[9]).unwrap();
        assert_eq!(kernel.mq_urgent(mq, &[8]), Err(KernelError::Full));

        let mut buf = [0u8; 4];
        let mut order = vec![];
        while kernel.mq_recv(mq, &mut buf, Timeout::NoWait).is_ok() {
            order.push(buf[0]);
        }
        assert_eq!(order, [9, 1, 2]);
    }

    #[test]
    fn test_oversize_and_full() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mq = kernel.mq_create("mq", 8, 1, WaitPolicy::Fifo).unwrap();
        assert_eq!(
            kernel.mq_send(mq, &[0u8; 9]),
            Err(KernelError::InvalidArgument)
        );
        kernel.mq_send(mq, &[0u8; 8]).unwrap();
        assert_eq!(kernel.mq_send(mq, &[1]), Err(KernelError::Full));
        assert_eq!(kernel.thread_error(main), Err(KernelError::Full));
    }

    #[test]
    fn test_short_buffer_truncates() {
        let (_port, kernel, _main) = boot(KernelConfig::new());
        let mq = kernel.mq_create("mq", 8, 2, WaitPolicy::Fifo).unwrap();
        kernel.mq_send(mq, b"abcdefgh").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(kernel.mq_recv(mq, &mut buf, Timeout::NoWait), Ok(3));
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_static_pool_capacity() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        let pool: &'static mut [u8] = Box::leak(vec![0u8; 40].into_boxed_slice());
        let mq = kernel.mq_init("static", pool, 12, WaitPolicy::Fifo).unwrap();
        // 12 rounds up to 16, and 40 bytes hold two slots
        kernel.mq_send(mq, &[1]).unwrap();
        kernel.mq_send(mq, &[2]).unwrap();
        assert_eq!(kernel.mq_send(mq, &[3]), Err(KernelError::Full));
        kernel.mq_detach(mq).unwrap();
    }

    #[test]
    fn test_invalid_geometry() {
        let (_port, kernel) = sim_kernel(KernelConfig::new());
        assert_eq!(
            kernel.mq_create("zero", 0, 4, WaitPolicy::Fifo).err(),
            Some(KernelError::InvalidArgument)
        );
        assert_eq!(
            kernel.mq_create("none", 8, 0, WaitPolicy::Fifo).err(),
            Some(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_recv_wakes_blocked_sender_and_reset_aborts() {
        let (_port, kernel, main) = boot(KernelConfig::new());
        let mq = kernel.mq_create("mq", 4, 1, WaitPolicy::Fifo).unwrap();
        kernel.mq_send(mq, &[1]).unwrap();

        let tx = spawn(&kernel, "tx", 4);
        assert_eq!(
            kernel.mq_send_wait(mq, &[2], Timeout::Forever),
            Err(KernelError::Interrupted)
        );
        assert_eq!(kernel.thread_self(), Some(main));

        let mut buf = [0u8; 4];
        kernel.mq_recv(mq, &mut buf, Timeout::NoWait).unwrap();
        assert_eq!(kernel.thread_self(), Some(tx));
        assert_eq!(kernel.thread_error(tx), Ok(()));

        let rx = spawn(&kernel, "rx", 2);
        let _ = kernel.mq_recv(mq, &mut buf, Timeout::Forever);
        assert_eq!(kernel.thread_self(), Some(tx));
        kernel.mq_control(mq, MessageQueueCommand::Reset).unwrap();
        assert_eq!(kernel.thread_error(rx), Err(KernelError::Aborted));
    }
}
