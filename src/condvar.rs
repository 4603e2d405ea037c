//! Condition variables
//!
//! Always paired with a mutex held by the waiter. Releasing the mutex and
//! joining the wait queue happen under one critical section, so a signal
//! sent by whoever takes the mutex next cannot be lost.
//!
//! Author: Moroya Sakamoto

use crate::error::KernelError;
use crate::kernel::{Kernel, SysLock};
use crate::mutex::MutexId;
use crate::port::Port;
use crate::queue::{ThreadQueue, WaitQueue};
use crate::thread::{ThreadState, WakeupResult};
use crate::time::Timeout;

/// Handle of a condition variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondVarId(pub(crate) u8);

impl CondVarId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Condition variable control block
pub(crate) struct CondVarCb {
    pub queue: ThreadQueue,
}

impl<'a, P: Port> SysLock<'a, P> {
    /// Release `mutex`, wait for a signal, then take `mutex` back
    ///
    /// The mutex is re-acquired whatever the wakeup result.
    pub(crate) fn cond_wait_s(
        &mut self,
        id: CondVarId,
        mutex: MutexId,
        timeout: Timeout,
    ) -> WakeupResult {
        let st = self.state();
        let me = st.current();
        debug_assert_eq!(
            st.mutexes[mutex.index()].owner,
            Some(me),
            "condition wait without holding {mutex:?}"
        );
        if timeout == Timeout::Immediate {
            return WakeupResult::Timeout;
        }

        self.mutex_release_i(mutex);
        self.state().enqueue(WaitQueue::CondVar(id), me);
        let result = self.go_to_sleep_for(ThreadState::WaitingCondVar, timeout);
        self.mutex_lock_s(mutex);
        result
    }

    /// Wake the first waiter with [`WakeupResult::Ok`]; does not reschedule
    pub fn cond_signal_i(&mut self, id: CondVarId) {
        let _ = self.wakeup_head_i(WaitQueue::CondVar(id), WakeupResult::Ok);
    }

    /// Wake every waiter with [`WakeupResult::Reset`]; does not reschedule
    pub fn cond_broadcast_i(&mut self, id: CondVarId) {
        while self.wakeup_head_i(WaitQueue::CondVar(id), WakeupResult::Reset).is_some() {}
    }
}

impl<P: Port> Kernel<P> {
    pub fn cond_create(&self) -> Result<CondVarId, KernelError> {
        let mut lock = self.lock();
        let table = &mut lock.state().condvars;
        let id = CondVarId(table.len() as u8);
        table
            .push(CondVarCb { queue: ThreadQueue::new() })
            .map_err(|_| KernelError::CondVarTableFull)?;
        log::debug!("condition variable {id:?} created");
        Ok(id)
    }

    /// Wait on `id`, atomically releasing `mutex` meanwhile
    ///
    /// Returns [`WakeupResult::Ok`] after [`Kernel::cond_signal`] and
    /// [`WakeupResult::Reset`] after [`Kernel::cond_broadcast`].
    pub fn cond_wait(&self, id: CondVarId, mutex: MutexId) -> WakeupResult {
        self.cond_wait_timeout(id, mutex, Timeout::Infinite)
    }

    /// [`Kernel::cond_wait`] that may also end in [`WakeupResult::Timeout`]
    pub fn cond_wait_timeout(
        &self,
        id: CondVarId,
        mutex: MutexId,
        timeout: Timeout,
    ) -> WakeupResult {
        self.lock().cond_wait_s(id, mutex, timeout)
    }

    pub fn cond_signal(&self, id: CondVarId) {
        let mut lock = self.lock();
        lock.cond_signal_i(id);
        lock.reschedule_if_needed();
    }

    pub fn cond_broadcast(&self, id: CondVarId) {
        let mut lock = self.lock();
        lock.cond_broadcast_i(id);
        lock.reschedule_if_needed();
    }
}
