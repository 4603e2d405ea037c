//! Virtual timers: delta queue driven by the tick interrupt
//!
//! Armed timers form a list sorted by deadline where each entry stores the
//! ticks remaining *after its predecessor* fires. A tick only decrements the
//! head; summing deltas from the head gives an entry's remaining time.
//!
//! Slots `0..MAX_THREADS` are the per-thread timeout timers, the remaining
//! slots back the application timers handed out by [`Kernel::timer_set`].
//!
//! Author: Moroya Sakamoto

use core::num::NonZeroU32;

use crate::config::{MAX_THREADS, TIMER_SLOTS};
use crate::error::KernelError;
use crate::kernel::{Kernel, SysLock};
use crate::port::Port;
use crate::thread::ThreadId;
use crate::time::Ticks;

/// Timer callback, invoked from the tick with the critical section held
///
/// Must not block. It may use the `*_i` operations of the lock.
pub type TimerFn<P> = fn(&mut SysLock<'_, P>, usize);

/// Handle of an armed application timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    slot: u8,
    generation: u16,
}

/// What a timer does when it expires
pub(crate) enum TimerAction<P: Port> {
    /// Time out the wait of a thread
    Wakeup(ThreadId),
    /// Application callback with its argument
    Callback(TimerFn<P>, usize),
}

impl<P: Port> Clone for TimerAction<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Port> Copy for TimerAction<P> {}

#[derive(Clone, Copy)]
struct Entry<A> {
    /// Ticks after the predecessor fires
    delta: Ticks,
    prev: Option<u8>,
    next: Option<u8>,
    /// Present while armed
    action: Option<A>,
    /// Bumped on every arm
    generation: u16,
}

impl<A> Entry<A> {
    const fn vacant() -> Self {
        Self { delta: 0, prev: None, next: None, action: None, generation: 0 }
    }
}

/// Delta queue over a fixed slot table
pub(crate) struct TimerList<A, const N: usize> {
    entries: [Entry<A>; N],
    head: Option<u8>,
    tail: Option<u8>,
}

impl<A: Copy, const N: usize> TimerList<A, N> {
    pub const fn new() -> Self {
        Self {
            entries: [const { Entry::vacant() }; N],
            head: None,
            tail: None,
        }
    }

    pub fn is_armed(&self, slot: usize) -> bool {
        self.entries[slot].action.is_some()
    }

    pub fn generation(&self, slot: usize) -> u16 {
        self.entries[slot].generation
    }

    /// Number of armed timers
    pub fn armed(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_some()).count()
    }

    /// Insert `slot` so that it fires `ticks` ticks from now
    pub fn arm(&mut self, slot: usize, ticks: NonZeroU32, action: A) {
        debug_assert!(!self.is_armed(slot), "timer slot {slot} already armed");

        let mut time = ticks.get();
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let entry = &self.entries[c as usize];
            if entry.delta >= time {
                break;
            }
            time -= entry.delta;
            cursor = entry.next;
        }

        let prev = match cursor {
            Some(c) => self.entries[c as usize].prev,
            None => self.tail,
        };
        let id = slot as u8;
        let entry = &mut self.entries[slot];
        entry.delta = time;
        entry.prev = prev;
        entry.next = cursor;
        entry.action = Some(action);
        entry.generation = entry.generation.wrapping_add(1);

        match prev {
            Some(p) => self.entries[p as usize].next = Some(id),
            None => self.head = Some(id),
        }
        match cursor {
            Some(c) => {
                // The follower was relative to our predecessor
                self.entries[c as usize].prev = Some(id);
                self.entries[c as usize].delta -= time;
            }
            None => self.tail = Some(id),
        }
    }

    /// Remove an armed `slot` before it fires
    pub fn disarm(&mut self, slot: usize) {
        debug_assert!(self.is_armed(slot), "timer slot {slot} is not armed");
        if !self.is_armed(slot) {
            return;
        }
        let Entry { delta, prev, next, .. } = self.entries[slot];
        match next {
            Some(n) => {
                self.entries[n as usize].delta += delta;
                self.entries[n as usize].prev = prev;
            }
            None => self.tail = prev,
        }
        match prev {
            Some(p) => self.entries[p as usize].next = next,
            None => self.head = next,
        }
        let entry = &mut self.entries[slot];
        entry.prev = None;
        entry.next = None;
        entry.action = None;
    }

    /// One tick elapsed: decrement the head's delta
    pub fn advance(&mut self) {
        if let Some(h) = self.head {
            let head = &mut self.entries[h as usize];
            debug_assert!(head.delta > 0, "expired timer left at the head");
            head.delta = head.delta.saturating_sub(1);
        }
    }

    /// Unlink the head if it has expired, returning its action
    pub fn pop_expired(&mut self) -> Option<A> {
        let h = self.head? as usize;
        if self.entries[h].delta != 0 {
            return None;
        }
        let entry = &mut self.entries[h];
        let action = entry.action.take();
        let next = entry.next.take();
        self.head = next;
        match next {
            Some(n) => self.entries[n as usize].prev = None,
            None => self.tail = None,
        }
        action
    }

    /// Ticks until `slot` fires, if armed
    pub fn remaining(&self, slot: usize) -> Option<Ticks> {
        self.entries[slot].action?;
        let mut total: Ticks = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            total += self.entries[c as usize].delta;
            if c as usize == slot {
                return Some(total);
            }
            cursor = self.entries[c as usize].next;
        }
        None
    }
}

impl<'a, P: Port> SysLock<'a, P> {
    /// Arm an application timer
    pub fn timer_set_i(
        &mut self,
        delay: NonZeroU32,
        callback: TimerFn<P>,
        arg: usize,
    ) -> Result<TimerId, KernelError> {
        let timers = &mut self.state().timers;
        let slot = (MAX_THREADS..TIMER_SLOTS)
            .find(|&s| !timers.is_armed(s))
            .ok_or(KernelError::TimerTableFull)?;
        timers.arm(slot, delay, TimerAction::Callback(callback, arg));
        Ok(TimerId {
            slot: slot as u8,
            generation: timers.generation(slot),
        })
    }

    /// Is the timer still waiting to fire?
    pub fn timer_is_armed_i(&mut self, id: TimerId) -> bool {
        let timers = &self.state().timers;
        let slot = id.slot as usize;
        timers.is_armed(slot) && timers.generation(slot) == id.generation
    }

    /// Cancel an armed application timer
    ///
    /// Cancelling a timer that already fired is a usage error.
    pub fn timer_reset_i(&mut self, id: TimerId) {
        let armed = self.timer_is_armed_i(id);
        debug_assert!(armed, "timer {id:?} already fired or was reset");
        if armed {
            self.state().timers.disarm(id.slot as usize);
        }
    }

    /// Ticks left before the timer fires
    pub fn timer_remaining_i(&mut self, id: TimerId) -> Option<Ticks> {
        if !self.timer_is_armed_i(id) {
            return None;
        }
        self.state().timers.remaining(id.slot as usize)
    }

    /// Tick interrupt body: advance time, charge the quantum and fire expired
    /// timers; does not reschedule
    pub fn tick_i(&mut self) {
        let st = self.state();
        st.time.advance();
        if st.ready.preempt > 0 {
            st.ready.preempt -= 1;
        }
        st.timers.advance();

        while let Some(action) = self.state().timers.pop_expired() {
            match action {
                TimerAction::Wakeup(thread) => self.timeout_wakeup_i(thread),
                TimerAction::Callback(callback, arg) => callback(self, arg),
            }
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Arm a one-shot timer calling `callback(lock, arg)` after `delay` ticks
    pub fn timer_set(
        &self,
        delay: NonZeroU32,
        callback: TimerFn<P>,
        arg: usize,
    ) -> Result<TimerId, KernelError> {
        self.lock().timer_set_i(delay, callback, arg)
    }

    /// Cancel an armed timer (usage error if it already fired)
    pub fn timer_reset(&self, id: TimerId) {
        self.lock().timer_reset_i(id);
    }

    pub fn timer_is_armed(&self, id: TimerId) -> bool {
        self.lock().timer_is_armed_i(id)
    }

    pub fn timer_remaining(&self, id: TimerId) -> Option<Ticks> {
        self.lock().timer_remaining_i(id)
    }

    /// Tick interrupt entry point: tick, then preempt if required
    pub fn tick(&self) {
        let mut lock = self.lock();
        lock.tick_i();
        lock.reschedule_if_needed();
    }
}
