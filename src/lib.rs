//! Kestrel-RTOS: preemptive real-time kernel core
//!
//! Priority-scheduled threads and blocking synchronization for single-core
//! microcontrollers:
//! - Static thread and object tables (no heap, no allocation)
//! - Priority-preemptive scheduling, round robin among equal priorities
//! - Counting semaphores, priority-inheritance mutexes, condition variables
//! - Mailboxes with front insertion
//! - Delta-queue virtual timers driven by a single tick interrupt
//!
//! All kernel state is guarded by one global critical section
//! ([`critical_section`]); the platform context switch lives behind [`Port`].
//! With the `std` feature, [`HostPort`] runs kernel threads on OS threads.
//!
//! ```ignore
//! static KERNEL: Kernel<MyPort> = Kernel::new(MyPort, Config::DEFAULT);
//!
//! fn blink(k: &'static Kernel<MyPort>, led: usize) -> Msg {
//!     while !k.should_terminate() {
//!         toggle(led);
//!         k.sleep(k.ms_to_ticks(500));
//!     }
//!     0
//! }
//!
//! KERNEL.init()?;
//! KERNEL.spawn("blink", Priority::NORMAL, blink, 3)?;
//! ```
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod condvar;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mailbox;
pub mod mutex;
pub mod port;
mod queue;
mod scheduler;
pub mod semaphore;
pub mod thread;
pub mod time;
pub mod timer;

#[cfg(any(test, feature = "std"))]
pub mod host;

#[cfg(test)]
mod testkit;

pub use condvar::CondVarId;
pub use config::Config;
pub use error::{ConfigError, KernelError, WaitError};
pub use kernel::{Kernel, KernelStats, SysLock, ThreadFn};
pub use mailbox::MailboxId;
pub use mutex::MutexId;
pub use port::Port;
pub use semaphore::SemaphoreId;
pub use thread::{Msg, Priority, ThreadId, ThreadInfo, ThreadState, WakeupResult};
pub use time::{Ticks, Timeout};
pub use timer::{TimerFn, TimerId};

#[cfg(any(test, feature = "std"))]
pub use host::HostPort;
