//! Mailboxes: bounded message FIFOs
//!
//! A ring of message slots guarded by two counting semaphores: `empty`
//! counts free slots and `full` counts queued messages. Producers and
//! consumers only touch the ring after winning a unit of the matching
//! semaphore, so the indices never need their own synchronization.
//!
//! ```text
//!   post:       wait(empty) ─► buffer[write++] ─► signal(full)
//!   post_ahead: wait(empty) ─► buffer[--read]  ─► signal(full)
//!   fetch:      wait(full)  ─► buffer[read++]  ─► signal(empty)
//! ```
//!
//! A reset bumps the mailbox epoch. A waiter that was handed a unit before
//! the reset but resumes after it sees the new epoch and reports `Reset`
//! without touching the rewound ring.
//!
//! Author: Moroya Sakamoto

use crate::config::{MAILBOX_SLOTS, MAX_SEMAPHORES};
use crate::error::{KernelError, WaitError};
use crate::kernel::{Kernel, SysLock};
use crate::port::Port;
use crate::semaphore::SemaphoreId;
use crate::thread::{Msg, ThreadState};
use crate::time::Timeout;

/// Handle of a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(pub(crate) u8);

impl MailboxId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mailbox control block
///
/// Size: MAILBOX_SLOTS × 4 bytes + 5 words
pub(crate) struct MailboxCb {
    buffer: [Msg; MAILBOX_SLOTS],
    /// Slots in use of `buffer`
    capacity: usize,
    write: usize,
    read: usize,
    /// Bumped by every reset
    epoch: u32,
    /// Free slots
    empty: SemaphoreId,
    /// Queued messages
    full: SemaphoreId,
}

impl MailboxCb {
    fn push_back(&mut self, msg: Msg) {
        self.buffer[self.write] = msg;
        self.write = (self.write + 1) % self.capacity;
    }

    fn push_front(&mut self, msg: Msg) {
        self.read = (self.read + self.capacity - 1) % self.capacity;
        self.buffer[self.read] = msg;
    }

    fn pop_front(&mut self) -> Msg {
        let msg = self.buffer[self.read];
        self.read = (self.read + 1) % self.capacity;
        msg
    }
}

impl<'a, P: Port> SysLock<'a, P> {
    fn mb_create_i(&mut self, capacity: usize) -> Result<MailboxId, KernelError> {
        if capacity == 0 || capacity > MAILBOX_SLOTS {
            return Err(KernelError::InvalidCapacity(capacity));
        }
        let st = self.state();
        if st.mailboxes.is_full() {
            return Err(KernelError::MailboxTableFull);
        }
        if MAX_SEMAPHORES - st.semaphores.len() < 2 {
            return Err(KernelError::SemaphoreTableFull);
        }

        let empty = self.sem_create_i(capacity as u32)?;
        let full = self.sem_create_i(0)?;
        let table = &mut self.state().mailboxes;
        let id = MailboxId(table.len() as u8);
        table
            .push(MailboxCb {
                buffer: [0; MAILBOX_SLOTS],
                capacity,
                write: 0,
                read: 0,
                epoch: 0,
                empty,
                full,
            })
            .map_err(|_| KernelError::MailboxTableFull)?;
        Ok(id)
    }

    fn mb_sems(&mut self, id: MailboxId) -> (SemaphoreId, SemaphoreId) {
        let mb = &self.state().mailboxes[id.index()];
        (mb.empty, mb.full)
    }

    /// Wait on `sem`, failing with `Reset` if the mailbox was reset meanwhile
    fn mb_wait_s(
        &mut self,
        id: MailboxId,
        sem: SemaphoreId,
        timeout: Timeout,
    ) -> Result<(), WaitError> {
        let epoch = self.state().mailboxes[id.index()].epoch;
        self.sem_wait_s(sem, timeout, ThreadState::WaitingMailbox).into_result()?;
        if self.state().mailboxes[id.index()].epoch != epoch {
            return Err(WaitError::Reset);
        }
        Ok(())
    }

    fn mb_store_s(
        &mut self,
        id: MailboxId,
        msg: Msg,
        ahead: bool,
        timeout: Timeout,
    ) -> Result<(), WaitError> {
        let (empty, full) = self.mb_sems(id);
        self.mb_wait_s(id, empty, timeout)?;
        self.mb_store(id, msg, ahead);
        self.sem_signal_i(full);
        self.reschedule_if_needed();
        Ok(())
    }

    fn mb_store(&mut self, id: MailboxId, msg: Msg, ahead: bool) {
        let mb = &mut self.state().mailboxes[id.index()];
        if ahead {
            mb.push_front(msg);
        } else {
            mb.push_back(msg);
        }
    }

    fn mb_fetch_s(&mut self, id: MailboxId, timeout: Timeout) -> Result<Msg, WaitError> {
        let (empty, full) = self.mb_sems(id);
        self.mb_wait_s(id, full, timeout)?;
        let msg = self.state().mailboxes[id.index()].pop_front();
        self.sem_signal_i(empty);
        self.reschedule_if_needed();
        Ok(msg)
    }

    /// Take one unit of `sem` only if it is available at once
    fn sem_try_take_i(&mut self, sem: SemaphoreId) -> Result<(), WaitError> {
        let count = &mut self.state().semaphores[sem.index()].count;
        if *count <= 0 {
            return Err(WaitError::Timeout);
        }
        *count -= 1;
        Ok(())
    }

    /// Post without blocking; a full mailbox yields [`WaitError::Timeout`]
    pub fn mb_post_i(&mut self, id: MailboxId, msg: Msg) -> Result<(), WaitError> {
        let (empty, full) = self.mb_sems(id);
        self.sem_try_take_i(empty)?;
        self.mb_store(id, msg, false);
        self.sem_signal_i(full);
        Ok(())
    }

    /// [`SysLock::mb_post_i`] at the front of the queue
    pub fn mb_post_ahead_i(&mut self, id: MailboxId, msg: Msg) -> Result<(), WaitError> {
        let (empty, full) = self.mb_sems(id);
        self.sem_try_take_i(empty)?;
        self.mb_store(id, msg, true);
        self.sem_signal_i(full);
        Ok(())
    }

    /// Fetch without blocking; an empty mailbox yields [`WaitError::Timeout`]
    pub fn mb_fetch_i(&mut self, id: MailboxId) -> Result<Msg, WaitError> {
        let (empty, full) = self.mb_sems(id);
        self.sem_try_take_i(full)?;
        let msg = self.state().mailboxes[id.index()].pop_front();
        self.sem_signal_i(empty);
        Ok(msg)
    }

    /// Discard every message and wake all waiters with `Reset`
    pub fn mb_reset_i(&mut self, id: MailboxId) {
        let mb = &mut self.state().mailboxes[id.index()];
        mb.write = 0;
        mb.read = 0;
        mb.epoch = mb.epoch.wrapping_add(1);
        let (empty, full, capacity) = (mb.empty, mb.full, mb.capacity);
        self.sem_reset_i(empty, capacity as u32);
        self.sem_reset_i(full, 0);
    }

    pub fn mb_used_i(&mut self, id: MailboxId) -> usize {
        let (_, full) = self.mb_sems(id);
        self.sem_count_i(full).max(0) as usize
    }

    pub fn mb_free_i(&mut self, id: MailboxId) -> usize {
        let (empty, _) = self.mb_sems(id);
        self.sem_count_i(empty).max(0) as usize
    }
}

impl<P: Port> Kernel<P> {
    /// Create a mailbox of `capacity` messages (two semaphores are consumed)
    pub fn mb_create(&self, capacity: usize) -> Result<MailboxId, KernelError> {
        let id = self.lock().mb_create_i(capacity)?;
        log::debug!("mailbox {id:?} created with {capacity} slots");
        Ok(id)
    }

    /// Queue `msg` behind the pending messages
    pub fn mb_post(&self, id: MailboxId, msg: Msg, timeout: Timeout) -> Result<(), WaitError> {
        self.lock().mb_store_s(id, msg, false, timeout)
    }

    /// Queue `msg` in front of the pending messages
    pub fn mb_post_ahead(
        &self,
        id: MailboxId,
        msg: Msg,
        timeout: Timeout,
    ) -> Result<(), WaitError> {
        self.lock().mb_store_s(id, msg, true, timeout)
    }

    /// Take the oldest message
    pub fn mb_fetch(&self, id: MailboxId, timeout: Timeout) -> Result<Msg, WaitError> {
        self.lock().mb_fetch_s(id, timeout)
    }

    /// Drop queued messages and abort every pending post and fetch
    pub fn mb_reset(&self, id: MailboxId) {
        let mut lock = self.lock();
        lock.mb_reset_i(id);
        lock.reschedule_if_needed();
    }

    /// Queued messages
    pub fn mb_used(&self, id: MailboxId) -> usize {
        self.lock().mb_used_i(id)
    }

    /// Free slots
    pub fn mb_free(&self, id: MailboxId) -> usize {
        self.lock().mb_free_i(id)
    }
}
