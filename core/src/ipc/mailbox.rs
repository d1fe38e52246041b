//! # Mailboxes
//!
//! Fixed-capacity rings of machine words.
//!
//! Receivers block on an empty mailbox, senders on a full one. Each side
//! wakes one thread of the other side after moving a word.

use super::{IpcKind, IpcObject, MailboxId, WaitPolicy};
use crate::object::{ObjectFlags, ObjectKind, Storage};
use crate::{contract_violation, Kernel, KernelError, KernelResult, ThreadId, Timeout};

/// Mailbox control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxCommand {
    /// Drop every queued word and abort every blocked thread
    Reset,
}

/// Mailbox payload
#[derive(Debug)]
pub(crate) struct Mailbox {
    pool: Storage<usize>,
    entry: u16,
    in_offset: u16,
    out_offset: u16,
}

impl Mailbox {
    fn new(pool: Storage<usize>) -> KernelResult<Self> {
        if pool.is_empty() || pool.len() > u16::MAX as usize {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self {
            pool,
            entry: 0,
            in_offset: 0,
            out_offset: 0,
        })
    }

    fn capacity(&self) -> u16 {
        self.pool.len() as u16
    }

    fn advance(&self, offset: u16) -> u16 {
        if offset + 1 >= self.capacity() {
            0
        } else {
            offset + 1
        }
    }

    fn push(&mut self, value: usize) -> bool {
        if self.entry == self.capacity() {
            return false;
        }
        self.pool.as_mut_slice()[self.in_offset as usize] = value;
        self.in_offset = self.advance(self.in_offset);
        self.entry += 1;
        true
    }

    fn pop(&mut self) -> Option<usize> {
        if self.entry == 0 {
            return None;
        }
        let value = self.pool.as_slice()[self.out_offset as usize];
        self.out_offset = self.advance(self.out_offset);
        self.entry -= 1;
        Some(value)
    }

    fn reset(&mut self) {
        self.entry = 0;
        self.in_offset = 0;
        self.out_offset = 0;
    }
}

impl IpcObject {
    #[track_caller]
    pub(crate) fn mailbox(&mut self) -> &mut Mailbox {
        match &mut self.kind {
            IpcKind::Mailbox(mb) => mb,
            _ => contract_violation("object is not a mailbox"),
        }
    }
}

impl Kernel {
    /// Initialize a mailbox over a caller-supplied pool
    pub fn mb_init(
        &self,
        name: &str,
        pool: &'static mut [usize],
        policy: WaitPolicy,
    ) -> KernelResult<MailboxId> {
        let mb = Mailbox::new(Storage::Static(pool))?;
        self.ipc_create(name, ObjectFlags::STATIC, policy, IpcKind::Mailbox(mb))
            .map(MailboxId)
    }

    /// Create a mailbox holding up to `size` words
    pub fn mb_create(&self, name: &str, size: u16, policy: WaitPolicy) -> KernelResult<MailboxId> {
        let mb = Mailbox::new(Storage::allocate(size as usize, 0)?)?;
        self.ipc_create(name, ObjectFlags::empty(), policy, IpcKind::Mailbox(mb))
            .map(MailboxId)
    }

    /// Release a mailbox made by [`Kernel::mb_init`]
    pub fn mb_detach(&self, mb: MailboxId) -> KernelResult<()> {
        self.ipc_destroy(mb.0, ObjectKind::Mailbox, true)
    }

    /// Free a mailbox made by [`Kernel::mb_create`]
    pub fn mb_delete(&self, mb: MailboxId) -> KernelResult<()> {
        self.ipc_destroy(mb.0, ObjectKind::Mailbox, false)
    }

    /// Post `value` without blocking. Fails with `Full`.
    pub fn mb_send(&self, mb: MailboxId, value: usize) -> KernelResult<()> {
        self.mb_send_wait(mb, value, Timeout::NoWait)
    }

    /// Post `value`, blocking up to `timeout` while the mailbox is full
    pub fn mb_send_wait(&self, mb: MailboxId, value: usize, timeout: Timeout) -> KernelResult<()> {
        let mut timeout = timeout;
        loop {
            let (thread, start) = {
                let mut guard = self.lock();
                let st = &mut *guard;
                if st.ipc_object(mb.0, ObjectKind::Mailbox).mailbox().push(value) {
                    let woke = st.wake_one(mb.0, false).is_some();
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
                st.pend(thread, mb.0, true, timeout)?;
                (thread, st.tick)
            };
            timeout = self.wait_again(thread, start, timeout)?;
        }
    }

    /// Receive the oldest word, blocking up to `timeout` while empty
    pub fn mb_recv(&self, mb: MailboxId, timeout: Timeout) -> KernelResult<usize> {
        let mut timeout = timeout;
        loop {
            let (thread, start) = {
                let mut guard = self.lock();
                let st = &mut *guard;
                if let Some(value) = st.ipc_object(mb.0, ObjectKind::Mailbox).mailbox().pop() {
                    let woke = st.wake_one(mb.0, true).is_some();
                    drop(guard);
                    if woke {
                        self.schedule();
                    }
                    return Ok(value);
                }
                if timeout.is_no_wait() {
                    let result = Err(KernelError::Timeout);
                    st.record_result(&result);
                    return result;
                }
                let thread = st.current_thread();
                st.pend(thread, mb.0, false, timeout)?;
                (thread, st.tick)
            };
            timeout = self.wait_again(thread, start, timeout)?;
        }
    }

    /// Reschedule after pending and work out how long a retry may still wait
    pub(crate) fn wait_again(
        &self,
        thread: ThreadId,
        start: u32,
        timeout: Timeout,
    ) -> KernelResult<Timeout> {
        self.schedule();
        self.thread_error(thread)?;
        let elapsed = self.tick_get().wrapping_sub(start);
        Ok(timeout.remaining(elapsed))
    }

    /// Control a mailbox
    pub fn mb_control(&self, mb: MailboxId, cmd: MailboxCommand) -> KernelResult<()> {
        match cmd {
            MailboxCommand::Reset => {
                let woken = {
                    let mut st = self.lock();
                    st.ipc_object(mb.0, ObjectKind::Mailbox).mailbox().reset();
                    st.wake_all(mb.0, false) + st.wake_all(mb.0, true)
                };
                if woken > 0 {
                    self.schedule();
                }
                Ok(())
            }
        }
    }

    /// Number of queued words
    pub fn mb_entry(&self, mb: MailboxId) -> u16 {
        self.lock().ipc_object(mb.0, ObjectKind::Mailbox).mailbox().entry
    }
}
