//! Priority-preemptive scheduler with round robin among equals
//!
//! The ready list is a [`ThreadQueue`] ordered by priority, FIFO among
//! equals; the running thread is not a member. A quantum counter decides how
//! an equal-priority ready thread is treated:
//!
//! | quantum left | preempts the running thread |
//! |--------------|-----------------------------|
//! | yes          | strictly higher priority     |
//! | no           | higher or equal priority     |
//!
//! Everything here runs with the critical section held.
//!
//! Author: Moroya Sakamoto

use core::num::NonZeroU32;

use crate::kernel::SysLock;
use crate::port::Port;
use crate::queue::{ThreadQueue, WaitQueue};
use crate::thread::{ThreadId, ThreadState, WakeupResult};
use crate::time::Timeout;
use crate::timer::TimerAction;

/// Ready threads plus the running one
pub(crate) struct ReadyList {
    pub queue: ThreadQueue,
    /// Running thread, never linked into `queue`
    pub current: ThreadId,
    /// Ticks left of the running thread's quantum
    pub preempt: u32,
    pub context_switches: u32,
}

impl ReadyList {
    pub const fn new() -> Self {
        Self {
            queue: ThreadQueue::new(),
            current: ThreadId(0),
            preempt: 0,
            context_switches: 0,
        }
    }
}

impl<'a, P: Port> SysLock<'a, P> {
    /// Running thread
    pub fn current(&mut self) -> ThreadId {
        self.state().current()
    }

    /// Link a blocked or new thread into the ready list
    ///
    /// Disarms its timeout. Does not reschedule.
    pub(crate) fn ready_i(&mut self, thread: ThreadId, result: WakeupResult) {
        let st = self.state();
        if st.timers.is_armed(thread.index()) {
            st.timers.disarm(thread.index());
        }
        let t = &mut st.threads[thread.index()];
        debug_assert!(
            !matches!(t.state, ThreadState::Ready | ThreadState::Running),
            "thread {thread:?} is already runnable"
        );
        t.state = ThreadState::Ready;
        t.wakeup = result;
        st.enqueue(WaitQueue::Ready, thread);
    }

    /// Make a suspended thread ready (no reschedule)
    pub fn resume_i(&mut self, thread: ThreadId) {
        let state = self.state().threads[thread.index()].state;
        debug_assert_eq!(state, ThreadState::Suspended, "resuming a thread that is not suspended");
        if state == ThreadState::Suspended {
            self.ready_i(thread, WakeupResult::Ok);
        }
    }

    /// Should the head of the ready list replace the running thread?
    pub fn is_preemption_required(&mut self) -> bool {
        let st = self.state();
        let Some(head) = st.ready.queue.head() else {
            return false;
        };
        let ready = st.threads[head.index()].prio;
        let running = st.threads[st.current().index()].prio;
        if st.ready.preempt > 0 {
            ready.is_higher_than(running)
        } else {
            !running.is_higher_than(ready)
        }
    }

    /// Preempt the running thread when required
    pub fn reschedule_if_needed(&mut self) {
        if self.is_preemption_required() {
            self.do_reschedule();
        }
    }

    /// Requeue the running thread and switch to the head of the ready list
    ///
    /// A thread preempted with quantum left goes back ahead of its equals,
    /// otherwise behind them.
    pub(crate) fn do_reschedule(&mut self) {
        let ahead = self.state().ready.preempt > 0;
        self.requeue_current(ahead);
    }

    /// Give way to a ready thread of equal or higher priority
    ///
    /// The running thread goes behind its equals. The quantum is untouched
    /// when nobody is waiting for the processor.
    pub(crate) fn yield_i(&mut self) {
        let st = self.state();
        let Some(head) = st.ready.queue.head() else {
            return;
        };
        let running = st.threads[st.current().index()].prio;
        if !running.is_higher_than(st.threads[head.index()].prio) {
            self.requeue_current(false);
        }
    }

    fn requeue_current(&mut self, ahead: bool) {
        let from = self.current();
        let to = self.take_next();

        let st = self.state();
        st.threads[from.index()].state = ThreadState::Ready;
        st.threads[from.index()].queue = WaitQueue::Ready;
        if ahead {
            st.ready.queue.insert_ahead(&mut st.threads, from);
        } else {
            st.ready.queue.insert(&mut st.threads, from);
        }
        self.dispatch(from, to);
    }

    /// Block the running thread in `state` until someone readies it
    ///
    /// The caller has already linked it into the right wait queue.
    pub(crate) fn go_to_sleep(&mut self, state: ThreadState) -> WakeupResult {
        let me = self.current();
        debug_assert!(self.state().idle != Some(me), "the idle thread must not block");
        self.state().threads[me.index()].state = state;
        let to = self.take_next();
        self.dispatch(me, to);
        self.state().threads[me.index()].wakeup
    }

    /// [`SysLock::go_to_sleep`] with a timeout after `ticks` ticks
    pub(crate) fn go_to_sleep_timeout(
        &mut self,
        state: ThreadState,
        ticks: NonZeroU32,
    ) -> WakeupResult {
        let me = self.current();
        self.state().timers.arm(me.index(), ticks, TimerAction::Wakeup(me));
        let result = self.go_to_sleep(state);
        debug_assert!(!self.state().timers.is_armed(me.index()), "timeout left armed after wakeup");
        result
    }

    pub(crate) fn go_to_sleep_for(&mut self, state: ThreadState, timeout: Timeout) -> WakeupResult {
        match timeout {
            Timeout::Infinite => self.go_to_sleep(state),
            Timeout::After(ticks) => self.go_to_sleep_timeout(state, ticks),
            Timeout::Immediate => {
                let me = self.current();
                self.cancel_wait(me);
                WakeupResult::Timeout
            }
        }
    }

    /// Withdraw a blocked thread from its wait queue, undoing its claim
    pub(crate) fn cancel_wait(&mut self, thread: ThreadId) {
        let st = self.state();
        if let WaitQueue::Semaphore(id) = st.threads[thread.index()].queue {
            st.semaphores[id.index()].count += 1;
        }
        st.unlink(thread);
    }

    /// Timeout timer of `thread` fired
    pub(crate) fn timeout_wakeup_i(&mut self, thread: ThreadId) {
        let state = self.state().threads[thread.index()].state;
        if !state.is_blocked() {
            log::warn!("timeout fired for {thread:?} in state {state:?}");
            return;
        }
        self.cancel_wait(thread);
        self.ready_i(thread, WakeupResult::Timeout);
    }

    /// Dequeue the head of a wait queue and make it ready with `result`
    pub(crate) fn wakeup_head_i(
        &mut self,
        tag: WaitQueue,
        result: WakeupResult,
    ) -> Option<ThreadId> {
        let thread = self.state().dequeue(tag)?;
        self.ready_i(thread, result);
        Some(thread)
    }

    /// Unlink the head of the ready list
    pub(crate) fn take_next(&mut self) -> ThreadId {
        match self.state().dequeue(WaitQueue::Ready) {
            Some(next) => next,
            None => unreachable!("ready list empty: the idle thread never blocks"),
        }
    }

    /// Bookkeeping for `to` becoming the running thread
    pub(crate) fn make_current(&mut self, to: ThreadId) {
        let quantum = self.config().time_quantum;
        let st = self.state();
        let thread = &mut st.threads[to.index()];
        thread.state = ThreadState::Running;
        thread.dispatches = thread.dispatches.wrapping_add(1);
        st.ready.current = to;
        st.ready.preempt = quantum;
        st.ready.context_switches = st.ready.context_switches.wrapping_add(1);
    }

    fn dispatch(&mut self, from: ThreadId, to: ThreadId) {
        self.make_current(to);
        log::trace!("switch {from:?} -> {to:?}");
        self.switch(from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::HostPort;
    use crate::kernel::Kernel;
    use crate::testkit::{boot, boot_with, leak, probe, Tokens};
    use crate::thread::{Msg, Priority};

    struct Ctx {
        tokens: Tokens,
        loops: u32,
    }

    fn letter(k: &'static Kernel<HostPort>) -> char {
        k.thread_info(k.current())
            .and_then(|t| t.name.chars().next())
            .unwrap_or('?')
    }

    fn yielder(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
        let ctx = probe::<Ctx>(arg);
        for _ in 0..ctx.loops {
            ctx.tokens.push(letter(k));
            k.yield_now();
        }
        0
    }

    fn ticker(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
        let ctx = probe::<Ctx>(arg);
        for _ in 0..ctx.loops {
            ctx.tokens.push(letter(k));
            k.tick();
        }
        0
    }

    #[test]
    fn test_ready_order_priority_then_fifo() {
        let k = boot();
        let ctx = leak(Ctx { tokens: Tokens::new(), loops: 1 });
        let a = k.spawn("A", Priority::LOW, yielder, ctx).unwrap();
        let b = k.spawn("B", Priority::HIGH.lowered(1), yielder, ctx).unwrap();
        let c = k.spawn("C", Priority::LOW, yielder, ctx).unwrap();
        // B outranks main and ran at once
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "B");
        for t in [a, b, c] {
            k.join(t);
        }
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "AC");
    }

    #[test]
    fn test_yield_alternates_equals() {
        let k = boot();
        let ctx = leak(Ctx { tokens: Tokens::new(), loops: 3 });
        let a = k.spawn("A", Priority::LOW, yielder, ctx).unwrap();
        let b = k.spawn("B", Priority::LOW, yielder, ctx).unwrap();
        k.join(a);
        k.join(b);
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "ABABAB");
    }

    #[test]
    fn test_round_robin_on_quantum_expiry() {
        let k = boot_with(Config::new().with_time_quantum(2));
        let ctx = leak(Ctx { tokens: Tokens::new(), loops: 4 });
        let a = k.spawn("A", Priority::LOW, ticker, ctx).unwrap();
        let b = k.spawn("B", Priority::LOW, ticker, ctx).unwrap();
        k.join(a);
        k.join(b);
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "AABBAABB");
    }

    #[test]
    fn test_higher_priority_wakeup_preempts() {
        let k = boot();
        let tokens = leak(Tokens::new());
        fn sleeper(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
            k.sleep(3);
            probe::<Tokens>(arg).push('H');
            0
        }
        let h = k.spawn("H", Priority::HIGH, sleeper, tokens).unwrap();
        for i in 0..3 {
            probe::<Tokens>(tokens).push(char::from(b'0' + i));
            k.tick();
        }
        assert_eq!(probe::<Tokens>(tokens).take(), "012H");
        k.join(h);
    }

    #[test]
    fn test_preempted_thread_resumes_ahead_of_equals() {
        let k = boot();
        let ctx = leak(Ctx { tokens: Tokens::new(), loops: 2 });
        fn sleeper(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
            k.sleep(1);
            probe::<Ctx>(arg).tokens.push('H');
            0
        }
        let h = k.spawn("H", Priority::HIGH, sleeper, ctx).unwrap();
        let a = k.spawn("A", Priority::NORMAL, ticker, ctx).unwrap();
        // main ticks once: H preempts main, main goes back ahead of A
        k.tick();
        probe::<Ctx>(ctx).tokens.push('m');
        k.join(h);
        k.join(a);
        assert_eq!(probe::<Ctx>(ctx).tokens.take(), "HmAA");
    }

    #[test]
    fn test_lone_yield_keeps_quantum() {
        let k = boot();
        let tokens = leak(Tokens::new());
        fn emit(k: &'static Kernel<HostPort>, arg: usize) -> Msg {
            probe::<Tokens>(arg).push(letter(k));
            0
        }
        let quantum = k.config().time_quantum;
        k.yield_now();
        let preempt = k.lock().state().ready.preempt;
        assert_eq!(preempt, quantum);
        // An equal arrival still waits for the quantum to run out
        let e = k.spawn("E", Priority::NORMAL, emit, tokens).unwrap();
        assert_eq!(probe::<Tokens>(tokens).take(), "");
        k.yield_now();
        assert_eq!(probe::<Tokens>(tokens).take(), "E");
        k.join(e);
    }
}
