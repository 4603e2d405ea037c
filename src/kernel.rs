//! Kernel: top-level RTOS instance
//!
//! Owns the thread table, the ready list, the timer list and every object
//! table in a single [`State`] that is only reachable through a [`SysLock`].
//! Taking the lock enters the global critical section; dropping it leaves.
//!
//! ```text
//!   Kernel::lock() ──► SysLock ──► state()  (I-class / S-class primitives)
//!                         │
//!                         └──► Port::switch  (context transfer, lock handed off)
//! ```
//!
//! Author: Moroya Sakamoto

use core::cell::UnsafeCell;
use core::num::NonZeroU32;

use critical_section::RestoreState;
use heapless::Vec;

use crate::condvar::CondVarCb;
use crate::config::{
    Config, MAX_CONDVARS, MAX_MAILBOXES, MAX_MUTEXES, MAX_SEMAPHORES, MAX_THREADS, TIMER_SLOTS,
};
use crate::error::KernelError;
use crate::mailbox::MailboxCb;
use crate::mutex::MutexCb;
use crate::port::Port;
use crate::queue::{ThreadQueue, WaitQueue};
use crate::scheduler::ReadyList;
use crate::semaphore::SemaphoreCb;
use crate::thread::{Msg, Priority, Thread, ThreadId, ThreadInfo, ThreadState, WakeupResult};
use crate::time::{self, SysTime, Ticks, Timeout};
use crate::timer::{TimerAction, TimerList};

/// Thread entry point, called once with the spawn argument
///
/// The returned message is collected by [`Kernel::join`].
pub type ThreadFn<P> = fn(&'static Kernel<P>, usize) -> Msg;

/// Name given to the boot context by [`Kernel::init`]
pub const MAIN_NAME: &str = "main";
/// Name of the idle thread
pub const IDLE_NAME: &str = "idle";

/// Mutable kernel state, guarded by the critical section
pub(crate) struct State<P: Port> {
    pub threads: [Thread; MAX_THREADS],
    /// Entry points not yet started
    pub entries: [Option<(ThreadFn<P>, usize)>; MAX_THREADS],
    /// Threads waiting in [`Kernel::join`], per joined thread
    pub joiners: [ThreadQueue; MAX_THREADS],
    pub ready: ReadyList,
    pub timers: TimerList<TimerAction<P>, TIMER_SLOTS>,
    pub semaphores: Vec<SemaphoreCb, MAX_SEMAPHORES>,
    pub mutexes: Vec<MutexCb, MAX_MUTEXES>,
    pub condvars: Vec<CondVarCb, MAX_CONDVARS>,
    pub mailboxes: Vec<MailboxCb, MAX_MAILBOXES>,
    pub time: SysTime,
    pub idle: Option<ThreadId>,
    pub initialized: bool,
}

impl<P: Port> State<P> {
    const fn new() -> Self {
        Self {
            threads: [const { Thread::empty() }; MAX_THREADS],
            entries: [const { None }; MAX_THREADS],
            joiners: [ThreadQueue::new(); MAX_THREADS],
            ready: ReadyList::new(),
            timers: TimerList::new(),
            semaphores: Vec::new(),
            mutexes: Vec::new(),
            condvars: Vec::new(),
            mailboxes: Vec::new(),
            time: SysTime::new(),
            idle: None,
            initialized: false,
        }
    }

    /// Running thread
    pub fn current(&self) -> ThreadId {
        self.ready.current
    }

    /// The queue behind a tag, split from the thread table
    pub fn wait_queue(&mut self, tag: WaitQueue) -> Option<(&mut ThreadQueue, &mut [Thread])> {
        let queue = match tag {
            WaitQueue::None => return None,
            WaitQueue::Ready => &mut self.ready.queue,
            WaitQueue::Semaphore(id) => &mut self.semaphores[id.index()].queue,
            WaitQueue::Mutex(id) => &mut self.mutexes[id.index()].queue,
            WaitQueue::CondVar(id) => &mut self.condvars[id.index()].queue,
            WaitQueue::Exit(thread) => &mut self.joiners[thread.index()],
        };
        Some((queue, &mut self.threads))
    }

    /// Link `thread` into the queue named by `tag`
    pub fn enqueue(&mut self, tag: WaitQueue, thread: ThreadId) {
        debug_assert_eq!(
            self.threads[thread.index()].queue,
            WaitQueue::None,
            "thread {thread:?} is already queued"
        );
        if let Some((queue, threads)) = self.wait_queue(tag) {
            queue.insert(threads, thread);
        }
        self.threads[thread.index()].queue = tag;
    }

    /// Unlink `thread` from whatever queue holds it
    pub fn unlink(&mut self, thread: ThreadId) {
        let tag = self.threads[thread.index()].queue;
        if let Some((queue, threads)) = self.wait_queue(tag) {
            queue.remove(threads, thread);
        }
        self.threads[thread.index()].queue = WaitQueue::None;
    }

    /// Unlink and return the head of the queue named by `tag`
    pub fn dequeue(&mut self, tag: WaitQueue) -> Option<ThreadId> {
        let (queue, threads) = self.wait_queue(tag)?;
        let head = queue.pop_front(threads)?;
        self.threads[head.index()].queue = WaitQueue::None;
        Some(head)
    }

    /// Restore queue order after the priority of `thread` changed
    pub fn requeue(&mut self, thread: ThreadId) {
        let tag = self.threads[thread.index()].queue;
        if let Some((queue, threads)) = self.wait_queue(tag) {
            queue.remove(threads, thread);
            queue.insert(threads, thread);
        }
    }
}

/// Real-time kernel instance
///
/// Usually a `static`, built with the const [`Kernel::new`] and brought up
/// with [`Kernel::init`] from the boot context.
pub struct Kernel<P: Port> {
    port: P,
    config: Config,
    state: UnsafeCell<State<P>>,
}

// SAFETY: `state` is only reached through a `SysLock`, i.e. inside the
// global critical section.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P, config: Config) -> Self {
        Self {
            port,
            config,
            state: UnsafeCell::new(State::new()),
        }
    }

    /// Turn the calling context into `main` and start the idle thread
    pub fn init(&'static self) -> Result<ThreadId, KernelError> {
        self.config.validate()?;
        let main = {
            let mut lock = self.lock();
            let st = lock.state();
            if st.initialized {
                return Err(KernelError::AlreadyInitialized);
            }
            st.initialized = true;

            let main = ThreadId(0);
            let thread = &mut st.threads[main.index()];
            *thread = Thread::new(MAIN_NAME, self.config.main_priority);
            thread.state = ThreadState::Running;
            thread.dispatches = 1;
            st.ready.current = main;
            st.ready.preempt = self.config.time_quantum;
            main
        };

        let idle = self.create(IDLE_NAME, Priority::IDLE, idle_main::<P>, 0)?;
        let mut lock = self.lock();
        lock.state().idle = Some(idle);
        lock.ready_i(idle, WakeupResult::Ok);
        log::debug!(
            "kernel up: {} Hz tick, {} tick quantum",
            self.config.tick_hz,
            self.config.time_quantum
        );
        Ok(main)
    }

    /// Enter the critical section
    pub fn lock(&self) -> SysLock<'_, P> {
        // SAFETY: released exactly once, by `SysLock::drop` or by the port
        let restore = unsafe { critical_section::acquire() };
        SysLock { kernel: self, restore }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// System time in ticks
    pub fn now(&self) -> Ticks {
        self.lock().state().time.now()
    }

    /// Is the system time inside `[start, end)`?
    pub fn in_time_window(&self, start: Ticks, end: Ticks) -> bool {
        time::in_time_window(self.now(), start, end)
    }

    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        self.config.ms_to_ticks(ms)
    }

    pub fn stats(&self) -> KernelStats {
        let mut lock = self.lock();
        let st = lock.state();
        KernelStats {
            now: st.time.now(),
            context_switches: st.ready.context_switches,
            live_threads: st.threads.iter().filter(|t| t.is_active()).count(),
            armed_timers: st.timers.armed(),
        }
    }

    /// Create a thread and make it ready
    ///
    /// The new thread preempts the caller when it has higher priority.
    pub fn spawn(
        &'static self,
        name: &'static str,
        prio: Priority,
        entry: ThreadFn<P>,
        arg: usize,
    ) -> Result<ThreadId, KernelError> {
        debug_assert!(prio != Priority::IDLE, "the idle priority is reserved");
        let thread = self.create(name, prio, entry, arg)?;
        let mut lock = self.lock();
        lock.ready_i(thread, WakeupResult::Ok);
        lock.reschedule_if_needed();
        Ok(thread)
    }

    fn create(
        &'static self,
        name: &'static str,
        prio: Priority,
        entry: ThreadFn<P>,
        arg: usize,
    ) -> Result<ThreadId, KernelError> {
        let thread = {
            let mut lock = self.lock();
            let st = lock.state();
            debug_assert!(st.initialized, "kernel not initialized");
            let slot = st
                .threads
                .iter()
                .position(|t| !t.is_active())
                .ok_or(KernelError::ThreadTableFull)?;
            st.threads[slot] = Thread::new(name, prio);
            st.entries[slot] = Some((entry, arg));
            ThreadId(slot as u8)
        };

        if let Err(err) = self.port.prepare(self, thread) {
            let mut lock = self.lock();
            let st = lock.state();
            st.threads[thread.index()] = Thread::empty();
            st.entries[thread.index()] = None;
            return Err(err);
        }
        log::debug!("thread {name:?} created as {thread:?} at {prio:?}");
        Ok(thread)
    }

    /// First-dispatch body of every thread context built by the port
    #[doc(hidden)]
    pub fn thread_main(&'static self, thread: ThreadId) {
        let entry = self.lock().state().entries[thread.index()].take();
        let msg = match entry {
            Some((entry, arg)) => entry(self, arg),
            None => 0,
        };
        self.exit(msg);
    }

    fn exit(&self, msg: Msg) {
        let mut lock = self.lock();
        let st = lock.state();
        let me = st.current();
        let thread = &mut st.threads[me.index()];
        debug_assert!(thread.held.is_empty(), "thread {:?} exited holding mutexes", thread.name);
        thread.exit_msg = msg;
        thread.state = ThreadState::Final;
        log::debug!("thread {:?} exited with {msg}", thread.name);

        while let Some(joiner) = lock.state().dequeue(WaitQueue::Exit(me)) {
            lock.ready_i(joiner, WakeupResult::Ok);
        }
        lock.finish(me);
    }

    /// Running thread
    pub fn current(&self) -> ThreadId {
        self.lock().state().current()
    }

    /// Snapshot of a thread, `None` for a free slot
    pub fn thread_info(&self, thread: ThreadId) -> Option<ThreadInfo> {
        let mut lock = self.lock();
        let t = &lock.state().threads[thread.index()];
        t.is_active().then(|| t.info())
    }

    /// Effective priority of the running thread
    pub fn priority(&self) -> Priority {
        let mut lock = self.lock();
        let st = lock.state();
        st.threads[st.current().index()].prio
    }

    /// Change the base priority of the running thread, returning the old one
    ///
    /// An inherited boost above the new priority stays in effect until the
    /// boosting mutexes are released.
    pub fn set_priority(&self, prio: Priority) -> Priority {
        debug_assert!(prio != Priority::IDLE, "the idle priority is reserved");
        let mut lock = self.lock();
        let st = lock.state();
        let me = st.current();
        let thread = &mut st.threads[me.index()];
        let old = thread.base_prio;
        if thread.prio == thread.base_prio || prio.is_higher_than(thread.prio) {
            thread.prio = prio;
        }
        thread.base_prio = prio;
        lock.reschedule_if_needed();
        old
    }

    /// Suspend the running thread for `ticks` ticks
    pub fn sleep(&self, ticks: Ticks) {
        match NonZeroU32::new(ticks) {
            Some(ticks) => {
                let mut lock = self.lock();
                let _ = lock.go_to_sleep_timeout(ThreadState::Sleeping, ticks);
            }
            None => self.yield_now(),
        }
    }

    /// Sleep until the system time reaches `deadline`
    ///
    /// Returns at once when the deadline is now.
    pub fn sleep_until(&self, deadline: Ticks) {
        let mut lock = self.lock();
        let delta = deadline.wrapping_sub(lock.state().time.now());
        if let Some(ticks) = NonZeroU32::new(delta) {
            let _ = lock.go_to_sleep_timeout(ThreadState::Sleeping, ticks);
        }
    }

    /// Hand the processor to the next ready thread of equal priority, if any
    pub fn yield_now(&self) {
        self.lock().yield_i();
    }

    /// Park the running thread until [`Kernel::resume`]
    pub fn suspend(&self) -> WakeupResult {
        self.lock().go_to_sleep(ThreadState::Suspended)
    }

    /// Bounded [`Kernel::suspend`]
    pub fn suspend_timeout(&self, timeout: Timeout) -> WakeupResult {
        self.lock().go_to_sleep_for(ThreadState::Suspended, timeout)
    }

    /// Make a suspended thread ready
    pub fn resume(&self, thread: ThreadId) {
        let mut lock = self.lock();
        lock.resume_i(thread);
        lock.reschedule_if_needed();
    }

    /// Ask `thread` to terminate; it polls [`Kernel::should_terminate`]
    pub fn request_terminate(&self, thread: ThreadId) {
        self.lock().state().threads[thread.index()].terminate = true;
    }

    /// Has termination of the running thread been requested?
    pub fn should_terminate(&self) -> bool {
        let mut lock = self.lock();
        let st = lock.state();
        st.threads[st.current().index()].terminate
    }

    /// Wait for `thread` to terminate and collect its exit message
    ///
    /// The slot is freed and may be reused by a later spawn.
    pub fn join(&self, thread: ThreadId) -> Msg {
        let mut lock = self.lock();
        let st = lock.state();
        let me = st.current();
        debug_assert!(thread != me, "a thread cannot join itself");
        debug_assert!(st.threads[thread.index()].is_active(), "joining a free slot");

        if st.threads[thread.index()].state != ThreadState::Final {
            debug_assert!(
                st.joiners[thread.index()].is_empty(),
                "thread {thread:?} already has a joiner"
            );
            st.enqueue(WaitQueue::Exit(thread), me);
            let _ = lock.go_to_sleep(ThreadState::WaitingExit);
        }

        let st = lock.state();
        let msg = st.threads[thread.index()].exit_msg;
        st.threads[thread.index()] = Thread::empty();
        st.entries[thread.index()] = None;
        msg
    }
}

fn idle_main<P: Port>(kernel: &'static Kernel<P>, _arg: usize) -> Msg {
    loop {
        kernel.port.idle(kernel);
    }
}

/// Critical-section guard
///
/// Every `*_i` (callable from interrupt handlers and timer callbacks) and
/// blocking primitive is a method on this guard.
pub struct SysLock<'a, P: Port> {
    kernel: &'a Kernel<P>,
    restore: RestoreState,
}

impl<'a, P: Port> SysLock<'a, P> {
    pub(crate) fn state(&mut self) -> &mut State<P> {
        // SAFETY: the critical section is held for the guard's lifetime
        unsafe { &mut *self.kernel.state.get() }
    }

    pub(crate) fn config(&self) -> &'a Config {
        &self.kernel.config
    }

    /// System time in ticks
    pub fn now(&mut self) -> Ticks {
        self.state().time.now()
    }

    /// Transfer control; returns once `from` runs again
    pub(crate) fn switch(&mut self, from: ThreadId, to: ThreadId) {
        debug_assert_ne!(from, to);
        // SAFETY: `from` is the calling context and holds the section
        self.restore = unsafe { self.kernel.port.switch(from, to, self.restore) };
    }

    /// Transfer control away from a terminated thread, consuming the guard
    pub(crate) fn finish(self, from: ThreadId) {
        let mut this = core::mem::ManuallyDrop::new(self);
        let to = this.take_next();
        this.make_current(to);
        log::trace!("{from:?} finished, switching to {to:?}");
        // SAFETY: the port releases the section the guard held
        unsafe { this.kernel.port.finish(from, to, this.restore) };
    }
}

impl<P: Port> Drop for SysLock<'_, P> {
    fn drop(&mut self) {
        // SAFETY: acquired in `Kernel::lock` or handed back by the port
        unsafe { critical_section::release(self.restore) };
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    /// System time (ticks)
    pub now: Ticks,
    /// Context switches since boot
    pub context_switches: u32,
    /// Threads occupying a slot, `main` and `idle` included
    pub live_threads: usize,
    /// Armed timers, thread timeouts included
    pub armed_timers: usize,
}
