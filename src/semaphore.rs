//! Counting semaphores
//!
//! The counter follows the classic RTOS convention: a negative value is the
//! number of queued waiters, so `count >= 0` implies an empty queue. Waiters
//! are released in ready-list order (priority, then arrival).
//!
//! Author: Moroya Sakamoto

use crate::error::KernelError;
use crate::kernel::{Kernel, SysLock};
use crate::port::Port;
use crate::queue::{ThreadQueue, WaitQueue};
use crate::thread::{ThreadState, WakeupResult};
use crate::time::Timeout;

/// Handle of a semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(pub(crate) u8);

impl SemaphoreId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Semaphore control block
pub(crate) struct SemaphoreCb {
    pub count: i32,
    pub queue: ThreadQueue,
}

impl SemaphoreCb {
    const fn new(count: i32) -> Self {
        Self { count, queue: ThreadQueue::new() }
    }
}

impl<'a, P: Port> SysLock<'a, P> {
    pub(crate) fn sem_create_i(&mut self, count: u32) -> Result<SemaphoreId, KernelError> {
        debug_assert!(count <= i32::MAX as u32, "semaphore count out of range");
        let table = &mut self.state().semaphores;
        let id = SemaphoreId(table.len() as u8);
        table
            .push(SemaphoreCb::new(count as i32))
            .map_err(|_| KernelError::SemaphoreTableFull)?;
        Ok(id)
    }

    /// Take one unit, blocking in `state` while none is available
    pub(crate) fn sem_wait_s(
        &mut self,
        id: SemaphoreId,
        timeout: Timeout,
        state: ThreadState,
    ) -> WakeupResult {
        let st = self.state();
        let sem = &mut st.semaphores[id.index()];
        sem.count -= 1;
        if sem.count >= 0 {
            return WakeupResult::Ok;
        }
        if timeout == Timeout::Immediate {
            sem.count += 1;
            return WakeupResult::Timeout;
        }
        let me = st.current();
        st.enqueue(WaitQueue::Semaphore(id), me);
        self.go_to_sleep_for(state, timeout)
    }

    /// Release one unit, handing it straight to the first waiter if any
    ///
    /// Does not reschedule.
    pub fn sem_signal_i(&mut self, id: SemaphoreId) {
        let sem = &mut self.state().semaphores[id.index()];
        let had_waiters = sem.count < 0;
        sem.count += 1;
        if had_waiters {
            let _ = self.wakeup_head_i(WaitQueue::Semaphore(id), WakeupResult::Ok);
        }
    }

    /// Wake every waiter with [`WakeupResult::Reset`] and set the counter
    ///
    /// Does not reschedule.
    pub fn sem_reset_i(&mut self, id: SemaphoreId, count: u32) {
        debug_assert!(count <= i32::MAX as u32, "semaphore count out of range");
        self.state().semaphores[id.index()].count = count as i32;
        while self.wakeup_head_i(WaitQueue::Semaphore(id), WakeupResult::Reset).is_some() {}
    }

    /// Raw counter; negative means that many waiters
    pub fn sem_count_i(&mut self, id: SemaphoreId) -> i32 {
        self.state().semaphores[id.index()].count
    }
}

impl<P: Port> Kernel<P> {
    /// Create a semaphore holding `count` units
    pub fn sem_create(&self, count: u32) -> Result<SemaphoreId, KernelError> {
        let id = self.lock().sem_create_i(count)?;
        log::debug!("semaphore {id:?} created with count {count}");
        Ok(id)
    }

    /// Take one unit, waiting as long as needed
    pub fn sem_wait(&self, id: SemaphoreId) -> WakeupResult {
        self.sem_wait_timeout(id, Timeout::Infinite)
    }

    /// Take one unit within `timeout`
    pub fn sem_wait_timeout(&self, id: SemaphoreId, timeout: Timeout) -> WakeupResult {
        self.lock().sem_wait_s(id, timeout, ThreadState::WaitingSemaphore)
    }

    /// Release one unit
    pub fn sem_signal(&self, id: SemaphoreId) {
        let mut lock = self.lock();
        lock.sem_signal_i(id);
        lock.reschedule_if_needed();
    }

    /// Abort every pending wait and set the counter to `count`
    pub fn sem_reset(&self, id: SemaphoreId, count: u32) {
        let mut lock = self.lock();
        lock.sem_reset_i(id, count);
        lock.reschedule_if_needed();
    }

    /// Atomically signal `signal` and wait on `wait`
    pub fn sem_signal_wait(&self, signal: SemaphoreId, wait: SemaphoreId) -> WakeupResult {
        let mut lock = self.lock();
        lock.sem_signal_i(signal);
        let st = lock.state();
        let sem = &mut st.semaphores[wait.index()];
        sem.count -= 1;
        if sem.count >= 0 {
            lock.reschedule_if_needed();
            return WakeupResult::Ok;
        }
        let me = st.current();
        st.enqueue(WaitQueue::Semaphore(wait), me);
        lock.go_to_sleep(ThreadState::WaitingSemaphore)
    }

    pub fn sem_count(&self, id: SemaphoreId) -> i32 {
        self.lock().sem_count_i(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostPort;
    use crate::testkit::{boot, leak, probe, Counter, Tokens};
    use crate::thread::{Msg, Priority};
    use crate::timer::TimerFn;
    use core::num::NonZeroU32;
    use proptest::prelude::*;

    struct Ctx {
        sem: SemaphoreId,
        tokens: Tokens,
    }

    fn take_and_emit(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
        let ctx = probe::<Ctx>(arg);
        let r = k.sem_wait(ctx.sem);
        let name = k.thread_info(k.current()).map_or("?", |t| t.name);
        ctx.tokens.push_str(if r.is_ok() { name } else { "!" });
        0
    }

    fn take_or_reset(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
        let ctx = probe::<Ctx>(arg);
        match k.sem_wait(ctx.sem) {
            WakeupResult::Reset => ctx.tokens.push('R'),
            WakeupResult::Ok => ctx.tokens.push('O'),
            WakeupResult::Timeout => ctx.tokens.push('T'),
        }
        0
    }

    #[test]
    fn test_wait_without_blocking() {
        let k = boot();
        let s = k.sem_create(2).unwrap();
        assert_eq!(k.sem_wait(s), WakeupResult::Ok);
        assert_eq!(k.sem_wait_timeout(s, Timeout::IMMEDIATE), WakeupResult::Ok);
        assert_eq!(k.sem_count(s), 0);
        assert_eq!(k.sem_wait_timeout(s, Timeout::IMMEDIATE), WakeupResult::Timeout);
        assert_eq!(k.sem_count(s), 0);
    }

    #[test]
    fn test_waiters_released_by_priority() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let ctx = leak(Ctx { sem, tokens: Tokens::new() });
        let base = Priority::HIGH;
        let threads = [
            k.spawn("A", base.raised(5), take_and_emit, ctx).unwrap(),
            k.spawn("B", base.raised(1), take_and_emit, ctx).unwrap(),
            k.spawn("C", base.raised(3), take_and_emit, ctx).unwrap(),
            k.spawn("D", base.raised(4), take_and_emit, ctx).unwrap(),
            k.spawn("E", base.raised(2), take_and_emit, ctx).unwrap(),
        ];
        assert_eq!(k.sem_count(sem), -5);
        for _ in 0..5 {
            k.sem_signal(sem);
        }
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "ADCEB");
        assert_eq!(k.sem_count(sem), 0);
        for t in threads {
            k.join(t);
        }
    }

    #[test]
    fn test_equal_priority_waiters_fifo() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let ctx = leak(Ctx { sem, tokens: Tokens::new() });
        let threads = ["A", "B", "C", "D"]
            .map(|name| k.spawn(name, Priority::HIGH, take_and_emit, ctx).unwrap());
        for _ in 0..4 {
            k.sem_signal(sem);
        }
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "ABCD");
        for t in threads {
            k.join(t);
        }
    }

    #[test]
    fn test_wait_timeout_expires() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let tokens = Tokens::new();
        let start = k.now();
        for i in 0..5u8 {
            tokens.push(char::from(b'A' + i));
            assert_eq!(k.sem_wait_timeout(sem, Timeout::ticks(500)), WakeupResult::Timeout);
            assert_eq!(k.sem_count(sem), 0);
        }
        assert_eq!(tokens.take(), "ABCDE");
        assert_eq!(k.now().wrapping_sub(start), 2500);
        assert_eq!(k.stats().armed_timers, 0);
    }

    fn signal_from_timer(lock: &mut SysLock<'_, HostPort>, arg: usize) {
        let ctx = probe::<(SemaphoreId, Counter)>(arg);
        ctx.1.bump();
        lock.sem_signal_i(ctx.0);
    }

    #[test]
    fn test_signal_from_timer_callback() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let ctx = leak((sem, Counter::new()));
        let callback: TimerFn<HostPort> = signal_from_timer;
        k.timer_set(NonZeroU32::new(40).unwrap(), callback, ctx).unwrap();
        assert_eq!(k.sem_wait_timeout(sem, Timeout::ticks(100)), WakeupResult::Ok);
        assert_eq!(k.now(), 40);
        assert_eq!(probe::<(SemaphoreId, Counter)>(ctx).1.get(), 1);
    }

    #[test]
    fn test_satisfied_wait_never_times_out() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let ctx = leak((sem, Counter::new()));
        k.timer_set(NonZeroU32::new(10).unwrap(), signal_from_timer, ctx).unwrap();
        assert_eq!(k.sem_wait_timeout(sem, Timeout::ticks(11)), WakeupResult::Ok);
        // The timeout would have fired at tick 11; keep time moving past it
        k.sleep(20);
        assert_eq!(k.now(), 30);
        assert_eq!(k.sem_count(sem), 0);
        assert_eq!(k.stats().armed_timers, 0);
        assert_eq!(probe::<(SemaphoreId, Counter)>(ctx).1.get(), 1);
    }

    #[test]
    fn test_reset_wakes_all_waiters() {
        let k = boot();
        let sem = k.sem_create(0).unwrap();
        let ctx = leak(Ctx { sem, tokens: Tokens::new() });
        let threads = ["A", "B", "C"]
            .map(|name| k.spawn(name, Priority::HIGH, take_or_reset, ctx).unwrap());
        assert_eq!(k.sem_count(sem), -3);
        k.sem_reset(sem, 2);
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "RRR");
        assert_eq!(k.sem_count(sem), 2);
        for t in threads {
            k.join(t);
        }
    }

    fn signal_wait_peer(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
        let ctx = probe::<(SemaphoreId, Tokens)>(arg);
        ctx.1.push('w');
        let r = k.sem_wait(ctx.0);
        ctx.1.push(if r.is_ok() { 'a' } else { '!' });
        0
    }

    fn signal_by_index(lock: &mut SysLock<'_, HostPort>, arg: usize) {
        lock.sem_signal_i(SemaphoreId(arg as u8));
    }

    #[test]
    fn test_signal_wait() {
        let k = boot();
        let peer_sem = k.sem_create(0).unwrap();
        let own = k.sem_create(0).unwrap();
        let ctx = leak((peer_sem, Tokens::new()));
        let t = k.spawn("peer", Priority::LOW, signal_wait_peer, ctx).unwrap();

        // Let the peer block first
        k.sleep(1);
        assert_eq!(k.sem_count(peer_sem), -1);

        k.timer_set(NonZeroU32::new(5).unwrap(), signal_by_index, own.index()).unwrap();
        assert_eq!(k.sem_signal_wait(peer_sem, own), WakeupResult::Ok);
        assert_eq!(probe::<(SemaphoreId, Tokens)>(ctx).1.take(), "wa");
        assert_eq!(k.sem_count(peer_sem), 0);
        assert_eq!(k.sem_count(own), 0);
        k.join(t);
    }

    #[test]
    fn test_signal_wait_without_blocking() {
        let k = boot();
        let a = k.sem_create(0).unwrap();
        let b = k.sem_create(1).unwrap();
        assert_eq!(k.sem_signal_wait(a, b), WakeupResult::Ok);
        assert_eq!(k.sem_count(a), 1);
        assert_eq!(k.sem_count(b), 0);
    }

    #[test]
    fn test_semaphore_table_full() {
        let k = boot();
        for _ in 0..crate::config::MAX_SEMAPHORES {
            k.sem_create(0).unwrap();
        }
        assert_eq!(k.sem_create(0), Err(KernelError::SemaphoreTableFull));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_signals_add_to_count(initial in 0u32..16, signals in 0u32..64) {
            let k = boot();
            let sem = k.sem_create(initial).unwrap();
            for _ in 0..signals {
                k.sem_signal(sem);
            }
            prop_assert_eq!(k.sem_count(sem), (initial + signals) as i32);
        }
    }
}
