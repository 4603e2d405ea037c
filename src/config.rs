//! Kernel configuration: static capacities and runtime tunables
//!
//! Capacities are compile-time constants so every table is a fixed array.
//! Tunables live in [`Config`], which is `const`-constructible for use in a
//! `static` kernel instance.
//!
//! Author: Moroya Sakamoto

use crate::error::ConfigError;
use crate::thread::Priority;
use crate::time::Ticks;

/// Maximum threads, including `main` and `idle`
pub const MAX_THREADS: usize = 16;
/// Maximum semaphores (each mailbox consumes two)
pub const MAX_SEMAPHORES: usize = 24;
/// Maximum mutexes
pub const MAX_MUTEXES: usize = 8;
/// Maximum condition variables
pub const MAX_CONDVARS: usize = 8;
/// Maximum mailboxes
pub const MAX_MAILBOXES: usize = 4;
/// Largest mailbox capacity, in messages
pub const MAILBOX_SLOTS: usize = 16;
/// Application virtual timers (thread timeouts have their own slots)
pub const MAX_TIMERS: usize = 8;

/// Timer slots: one timeout timer per thread plus the application timers
pub(crate) const TIMER_SLOTS: usize = MAX_THREADS + MAX_TIMERS;

/// Runtime kernel tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Tick interrupt frequency (Hz)
    pub tick_hz: u32,
    /// Round-robin quantum among equal priorities (ticks)
    pub time_quantum: u32,
    /// Priority given to the boot context when it becomes `main`
    pub main_priority: Priority,
}

impl Config {
    /// 1 kHz tick, 20-tick quantum, `main` at normal priority
    pub const DEFAULT: Config = Config {
        tick_hz: 1000,
        time_quantum: 20,
        main_priority: Priority::NORMAL,
    };

    pub const fn new() -> Self {
        Self::DEFAULT
    }

    pub const fn with_tick_hz(mut self, tick_hz: u32) -> Self {
        self.tick_hz = tick_hz;
        self
    }

    pub const fn with_time_quantum(mut self, ticks: u32) -> Self {
        self.time_quantum = ticks;
        self
    }

    pub const fn with_main_priority(mut self, prio: Priority) -> Self {
        self.main_priority = prio;
        self
    }

    /// Reject settings the kernel cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.time_quantum == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.main_priority == Priority::IDLE {
            return Err(ConfigError::IdleMainPriority);
        }
        Ok(())
    }

    /// Milliseconds to ticks, rounded up
    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        let ticks = (ms as u64 * self.tick_hz as u64).div_ceil(1000);
        ticks.min(Ticks::MAX as u64) as Ticks
    }

    /// Microseconds to ticks, rounded up
    pub fn us_to_ticks(&self, us: u32) -> Ticks {
        let ticks = (us as u64 * self.tick_hz as u64).div_ceil(1_000_000);
        ticks.min(Ticks::MAX as u64) as Ticks
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .with_tick_hz(10_000)
            .with_time_quantum(5)
            .with_main_priority(Priority::HIGH);
        assert_eq!(config.tick_hz, 10_000);
        assert_eq!(config.time_quantum, 5);
        assert_eq!(config.main_priority, Priority::HIGH);
    }

    #[test]
    fn test_validate_rejects() {
        assert_eq!(Config::new().with_tick_hz(0).validate(), Err(ConfigError::ZeroTickRate));
        assert_eq!(Config::new().with_time_quantum(0).validate(), Err(ConfigError::ZeroQuantum));
        assert_eq!(
            Config::new().with_main_priority(Priority::IDLE).validate(),
            Err(ConfigError::IdleMainPriority)
        );
    }

    #[test]
    fn test_ms_to_ticks_rounds_up() {
        let config = Config::new();
        assert_eq!(config.ms_to_ticks(0), 0);
        assert_eq!(config.ms_to_ticks(1), 1);
        assert_eq!(config.ms_to_ticks(500), 500);

        let slow = Config::new().with_tick_hz(100);
        assert_eq!(slow.ms_to_ticks(1), 1);
        assert_eq!(slow.ms_to_ticks(10), 1);
        assert_eq!(slow.ms_to_ticks(11), 2);
    }

    #[test]
    fn test_us_to_ticks() {
        let config = Config::new();
        assert_eq!(config.us_to_ticks(1), 1);
        assert_eq!(config.us_to_ticks(1000), 1);
        assert_eq!(config.us_to_ticks(1001), 2);
    }
}
