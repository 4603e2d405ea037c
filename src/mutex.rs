//! Mutexes with priority inheritance
//!
//! A thread blocking on an owned mutex lends its priority to the owner, and
//! on along the chain of mutexes that owner is itself waiting for. On unlock
//! the former owner drops to the highest of its base priority and the
//! waiters of the mutexes it still holds. Mutexes are not recursive and
//! waits are never bounded.
//!
//! Author: Moroya Sakamoto

use crate::config::MAX_THREADS;
use crate::error::KernelError;
use crate::kernel::{Kernel, SysLock};
use crate::port::Port;
use crate::queue::{ThreadQueue, WaitQueue};
use crate::thread::{ThreadId, ThreadState, WakeupResult};

/// Handle of a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) u8);

impl MutexId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Mutex control block
pub(crate) struct MutexCb {
    pub owner: Option<ThreadId>,
    pub queue: ThreadQueue,
}

impl MutexCb {
    const fn new() -> Self {
        Self { owner: None, queue: ThreadQueue::new() }
    }
}

impl<'a, P: Port> SysLock<'a, P> {
    /// Make `thread` the owner of the free mutex `id`
    fn mutex_take(&mut self, id: MutexId, thread: ThreadId) {
        let st = self.state();
        st.mutexes[id.index()].owner = Some(thread);
        // One slot per mutex in the system, cannot overflow
        let pushed = st.threads[thread.index()].held.push(id);
        debug_assert!(pushed.is_ok(), "held-mutex list overflow");
    }

    /// Lend the priority of the running thread along the ownership chain
    fn mutex_boost_chain(&mut self, mut owner: ThreadId) {
        let st = self.state();
        let prio = st.threads[st.current().index()].prio;

        let mut hops = 0;
        while prio.is_higher_than(st.threads[owner.index()].prio) {
            hops += 1;
            if hops > MAX_THREADS {
                log::error!(
                    "priority inheritance chain exceeds {MAX_THREADS} threads, cycle suspected"
                );
                debug_assert!(false, "priority inheritance cycle");
                return;
            }

            st.threads[owner.index()].prio = prio;
            st.requeue(owner);

            let thread = &st.threads[owner.index()];
            match (thread.state, thread.queue) {
                (ThreadState::WaitingMutex, WaitQueue::Mutex(next)) => {
                    match st.mutexes[next.index()].owner {
                        Some(next_owner) => owner = next_owner,
                        None => return,
                    }
                }
                _ => return,
            }
        }
    }

    pub(crate) fn mutex_lock_s(&mut self, id: MutexId) {
        let st = self.state();
        let me = st.current();
        let Some(owner) = st.mutexes[id.index()].owner else {
            self.mutex_take(id, me);
            return;
        };
        debug_assert_ne!(owner, me, "mutex {id:?} is not recursive");

        self.mutex_boost_chain(owner);
        self.state().enqueue(WaitQueue::Mutex(id), me);
        let _ = self.go_to_sleep(ThreadState::WaitingMutex);
        // Ownership was handed over by the unlocking thread
        debug_assert_eq!(self.state().mutexes[id.index()].owner, Some(me));
    }

    pub(crate) fn mutex_try_lock_i(&mut self, id: MutexId) -> bool {
        let st = self.state();
        if st.mutexes[id.index()].owner.is_some() {
            return false;
        }
        let me = st.current();
        self.mutex_take(id, me);
        true
    }

    /// Release `id` held by the running thread; does not reschedule
    pub(crate) fn mutex_release_i(&mut self, id: MutexId) {
        let st = self.state();
        let me = st.current();
        debug_assert_eq!(
            st.mutexes[id.index()].owner,
            Some(me),
            "mutex {id:?} not owned by the caller"
        );

        let thread = &mut st.threads[me.index()];
        if let Some(pos) = thread.held.iter().position(|&m| m == id) {
            thread.held.remove(pos);
        }

        // Residual boost from the mutexes still held
        let mut prio = st.threads[me.index()].base_prio;
        for &held in st.threads[me.index()].held.iter() {
            if let Some(waiter) = st.mutexes[held.index()].queue.head() {
                prio = prio.highest(st.threads[waiter.index()].prio);
            }
        }
        st.threads[me.index()].prio = prio;

        match st.dequeue(WaitQueue::Mutex(id)) {
            Some(next) => {
                st.mutexes[id.index()].owner = None;
                self.mutex_take(id, next);
                self.ready_i(next, WakeupResult::Ok);
            }
            None => st.mutexes[id.index()].owner = None,
        }
    }

    /// Release every mutex held by the running thread; does not reschedule
    pub(crate) fn mutex_release_all_i(&mut self) {
        loop {
            let st = self.state();
            let me = st.current();
            let Some(&id) = st.threads[me.index()].held.last() else {
                return;
            };
            self.mutex_release_i(id);
        }
    }

    /// Owner of `id`, if locked
    pub fn mutex_owner_i(&mut self, id: MutexId) -> Option<ThreadId> {
        self.state().mutexes[id.index()].owner
    }
}

impl<P: Port> Kernel<P> {
    pub fn mutex_create(&self) -> Result<MutexId, KernelError> {
        let mut lock = self.lock();
        let table = &mut lock.state().mutexes;
        let id = MutexId(table.len() as u8);
        table.push(MutexCb::new()).map_err(|_| KernelError::MutexTableFull)?;
        log::debug!("mutex {id:?} created");
        Ok(id)
    }

    /// Lock, waiting as long as needed
    pub fn mutex_lock(&self, id: MutexId) {
        self.lock().mutex_lock_s(id);
    }

    /// Lock if free, without blocking
    pub fn mutex_try_lock(&self, id: MutexId) -> bool {
        self.lock().mutex_try_lock_i(id)
    }

    /// Unlock a mutex held by the running thread
    ///
    /// Mutexes may be released in any order.
    pub fn mutex_unlock(&self, id: MutexId) {
        let mut lock = self.lock();
        lock.mutex_release_i(id);
        lock.reschedule_if_needed();
    }

    /// Unlock every mutex held by the running thread
    pub fn mutex_unlock_all(&self) {
        let mut lock = self.lock();
        lock.mutex_release_all_i();
        lock.reschedule_if_needed();
    }

    pub fn mutex_owner(&self, id: MutexId) -> Option<ThreadId> {
        self.lock().mutex_owner_i(id)
    }
}
