//! System time: tick counter and timeout specifications
//!
//! The tick counter is advanced once per tick interrupt and wraps. Timeouts
//! distinguish "do not block" and "block forever" from every finite delay;
//! a finite delay is never zero.
//!
//! Author: Moroya Sakamoto

use core::num::NonZeroU32;

/// Kernel time unit
pub type Ticks = u32;

/// How long a blocking operation may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail at once instead of blocking
    Immediate,
    /// Never time out
    Infinite,
    /// Time out after this many ticks
    After(NonZeroU32),
}

impl Timeout {
    pub const IMMEDIATE: Timeout = Timeout::Immediate;
    pub const INFINITE: Timeout = Timeout::Infinite;

    /// Finite timeout; zero ticks means [`Timeout::Immediate`]
    pub const fn ticks(ticks: Ticks) -> Timeout {
        match NonZeroU32::new(ticks) {
            Some(t) => Timeout::After(t),
            None => Timeout::Immediate,
        }
    }
}

/// System tick counter
///
/// Size: 8 bytes
pub struct SysTime {
    /// Ticks since boot (wrapping)
    now: Ticks,
    /// Number of wraps
    overflows: u32,
}

impl SysTime {
    pub const fn new() -> Self {
        Self { now: 0, overflows: 0 }
    }

    /// Advance by one tick
    pub fn advance(&mut self) {
        let next = self.now.wrapping_add(1);
        if next == 0 {
            self.overflows += 1;
        }
        self.now = next;
    }

    /// Current time in ticks
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Number of counter wraps
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Elapsed ticks since a reference point
    pub fn elapsed_since(&self, reference: Ticks) -> Ticks {
        self.now.wrapping_sub(reference)
    }
}

/// Is `now` inside `[start, end)`, taking counter wrap into account?
pub fn in_time_window(now: Ticks, start: Ticks, end: Ticks) -> bool {
    if end >= start {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}
