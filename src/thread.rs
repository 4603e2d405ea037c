//! Thread control blocks: static, no-alloc thread records
//!
//! Every thread lives in a fixed slot of the kernel's thread table and is
//! addressed by its [`ThreadId`]. Queue linkage is stored in the record and
//! tagged with the one queue the thread currently belongs to.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::MAX_MUTEXES;
use crate::error::WaitError;
use crate::mutex::MutexId;
use crate::queue::{Link, QueueNode, WaitQueue};

/// Message word exchanged through mailboxes and returned by thread entries
pub type Msg = i32;

/// Handle of a thread slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub(crate) u8);

impl ThreadId {
    /// Slot index in the thread table
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Thread priority (lower number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Highest priority (hard real-time handlers)
    pub const CRITICAL: Priority = Priority(0);
    /// High priority (control loops)
    pub const HIGH: Priority = Priority(64);
    /// Normal priority (application threads, `main`)
    pub const NORMAL: Priority = Priority(128);
    /// Low priority (logging, telemetry)
    pub const LOW: Priority = Priority(192);
    /// Reserved for the idle thread
    pub const IDLE: Priority = Priority(255);

    /// Strictly more urgent than `other`?
    pub const fn is_higher_than(self, other: Priority) -> bool {
        self.0 < other.0
    }

    /// The more urgent of the two
    pub const fn highest(self, other: Priority) -> Priority {
        if other.is_higher_than(self) {
            other
        } else {
            self
        }
    }

    /// `levels` steps more urgent, saturating at [`Priority::CRITICAL`]
    pub const fn raised(self, levels: u8) -> Priority {
        Priority(self.0.saturating_sub(levels))
    }

    /// `levels` steps less urgent, saturating just above [`Priority::IDLE`]
    pub const fn lowered(self, levels: u8) -> Priority {
        let p = self.0.saturating_add(levels);
        if p >= Priority::IDLE.0 {
            Priority(Priority::IDLE.0 - 1)
        } else {
            Priority(p)
        }
    }
}

/// Thread state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot is free
    Inactive,
    /// In the ready list
    Ready,
    /// Currently executing
    Running,
    /// Parked until explicitly resumed
    Suspended,
    /// Blocked on a semaphore
    WaitingSemaphore,
    /// Blocked on a mutex
    WaitingMutex,
    /// Blocked on a condition variable
    WaitingCondVar,
    /// Blocked on a mailbox slot or message
    WaitingMailbox,
    /// Blocked until another thread terminates
    WaitingExit,
    /// Sleeping for a number of ticks
    Sleeping,
    /// Terminated, exit message not yet collected
    Final,
}

impl ThreadState {
    /// Is the thread parked on a kernel object or a timeout?
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ThreadState::Suspended
                | ThreadState::WaitingSemaphore
                | ThreadState::WaitingMutex
                | ThreadState::WaitingCondVar
                | ThreadState::WaitingMailbox
                | ThreadState::WaitingExit
                | ThreadState::Sleeping
        )
    }
}

/// Reason a blocked thread was made ready again
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupResult {
    /// The awaited event happened
    Ok,
    /// The timeout expired first
    Timeout,
    /// The object was reset, or a broadcast released every waiter
    Reset,
}

impl WakeupResult {
    pub fn is_ok(self) -> bool {
        self == WakeupResult::Ok
    }

    /// `Ok(())` for [`WakeupResult::Ok`], the matching [`WaitError`] otherwise
    pub fn into_result(self) -> Result<(), WaitError> {
        match self {
            WakeupResult::Ok => Ok(()),
            WakeupResult::Timeout => Err(WaitError::Timeout),
            WakeupResult::Reset => Err(WaitError::Reset),
        }
    }
}

/// Thread control block
pub(crate) struct Thread {
    /// Thread name
    pub name: &'static str,
    /// Effective priority (base plus any inherited boost)
    pub prio: Priority,
    /// Priority before inheritance
    pub base_prio: Priority,
    /// Current state
    pub state: ThreadState,
    /// Set by whoever makes the thread ready
    pub wakeup: WakeupResult,
    /// Queue linkage, valid while `queue != WaitQueue::None`
    pub link: Link,
    /// Which queue the thread is linked into
    pub queue: WaitQueue,
    /// Mutexes currently owned, in locking order
    pub held: Vec<MutexId, MAX_MUTEXES>,
    /// Value returned by the entry function
    pub exit_msg: Msg,
    /// Termination has been requested
    pub terminate: bool,
    /// Number of times the thread was dispatched
    pub dispatches: u32,
}

impl Thread {
    /// Empty thread slot
    pub const fn empty() -> Self {
        Self {
            name: "",
            prio: Priority::IDLE,
            base_prio: Priority::IDLE,
            state: ThreadState::Inactive,
            wakeup: WakeupResult::Ok,
            link: Link::new(),
            queue: WaitQueue::None,
            held: Vec::new(),
            exit_msg: 0,
            terminate: false,
            dispatches: 0,
        }
    }

    /// Fresh record for a thread about to be created
    pub const fn new(name: &'static str, prio: Priority) -> Self {
        let mut t = Self::empty();
        t.name = name;
        t.prio = prio;
        t.base_prio = prio;
        t.state = ThreadState::Suspended;
        t
    }

    /// Is this slot in use?
    pub fn is_active(&self) -> bool {
        self.state != ThreadState::Inactive
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            name: self.name,
            priority: self.prio,
            base_priority: self.base_prio,
            state: self.state,
            dispatches: self.dispatches,
        }
    }
}

impl QueueNode for Thread {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    fn priority(&self) -> Priority {
        self.prio
    }
}

/// Snapshot of a thread record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: &'static str,
    /// Effective priority
    pub priority: Priority,
    /// Priority without inheritance
    pub base_priority: Priority,
    pub state: ThreadState,
    /// Number of times the thread was dispatched
    pub dispatches: u32,
}
