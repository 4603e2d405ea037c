//! Host execution port (feature `std`)
//!
//! Each kernel thread is backed by an OS thread holding a baton; only the
//! thread whose baton was given last executes, so kernel threads still run
//! strictly one at a time. The boot context needs no OS thread of its own:
//! its baton is created the first time it is switched away from.
//!
//! The idle loop delivers the tick, so simulated time only moves while every
//! kernel thread is blocked (or when a running thread calls
//! [`Kernel::tick`] itself, which models an interrupt on the current
//! context).
//!
//! Author: Moroya Sakamoto

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::vec::Vec;

use critical_section::RestoreState;

use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::thread::ThreadId;

/// Run permission for one kernel thread
struct Baton {
    held: Mutex<bool>,
    given: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            held: Mutex::new(false),
            given: Condvar::new(),
        }
    }

    fn give(&self) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.given.notify_one();
    }

    /// Block until given, then consume it
    fn take(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while !*held {
            held = self.given.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        *held = false;
    }
}

/// [`Port`] running kernel threads on OS threads
pub struct HostPort {
    batons: Mutex<Vec<Arc<Baton>>>,
}

impl HostPort {
    pub const fn new() -> Self {
        Self {
            batons: Mutex::new(Vec::new()),
        }
    }

    fn batons(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Baton>>> {
        self.batons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn baton(&self, thread: ThreadId) -> Arc<Baton> {
        let mut batons = self.batons();
        if batons.len() <= thread.index() {
            batons.resize_with(thread.index() + 1, || Arc::new(Baton::new()));
        }
        Arc::clone(&batons[thread.index()])
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: batons serialize the OS threads; the critical section is released
// before a baton is passed and re-acquired after it is taken back.
unsafe impl Port for HostPort {
    fn prepare(&self, kernel: &'static Kernel<Self>, thread: ThreadId) -> Result<(), KernelError> {
        // A reused slot gets a fresh baton
        let baton = Arc::new(Baton::new());
        {
            let mut batons = self.batons();
            if batons.len() <= thread.index() {
                batons.resize_with(thread.index() + 1, || Arc::new(Baton::new()));
            }
            batons[thread.index()] = Arc::clone(&baton);
        }

        std::thread::Builder::new()
            .name(std::format!("kestrel-{}", thread.index()))
            .spawn(move || {
                baton.take();
                kernel.thread_main(thread);
            })
            .map(drop)
            .map_err(|err| {
                log::error!("cannot back {thread:?} with an OS thread: {err}");
                KernelError::ContextUnavailable
            })
    }

    unsafe fn switch(&self, from: ThreadId, to: ThreadId, restore: RestoreState) -> RestoreState {
        let own = self.baton(from);
        let next = self.baton(to);
        critical_section::release(restore);
        next.give();
        own.take();
        critical_section::acquire()
    }

    unsafe fn finish(&self, _from: ThreadId, to: ThreadId, restore: RestoreState) {
        let next = self.baton(to);
        critical_section::release(restore);
        next.give();
    }

    fn idle(&self, kernel: &'static Kernel<Self>) {
        kernel.tick();
        std::thread::yield_now();
    }
}
