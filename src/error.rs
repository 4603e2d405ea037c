//! Kernel error types
//!
//! Expected run-time outcomes of a wait are [`WaitError`]s; exhausted static
//! tables and bad configuration are [`KernelError`]s. Misuse of the API is not
//! an error value: it trips a debug assertion.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

/// Non-`Ok` outcome of a blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("wait timed out")]
    Timeout,
    #[error("object was reset while waiting")]
    Reset,
}

/// Rejected [`Config`](crate::config::Config) settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tick frequency must be non-zero")]
    ZeroTickRate,
    #[error("time quantum must be at least one tick")]
    ZeroQuantum,
    #[error("the idle priority is reserved for the idle thread")]
    IdleMainPriority,
}

/// Kernel resource and lifecycle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("thread table is full")]
    ThreadTableFull,
    #[error("semaphore table is full")]
    SemaphoreTableFull,
    #[error("mutex table is full")]
    MutexTableFull,
    #[error("condition variable table is full")]
    CondVarTableFull,
    #[error("mailbox table is full")]
    MailboxTableFull,
    #[error("no free virtual timer")]
    TimerTableFull,
    #[error("mailbox capacity {0} is out of range")]
    InvalidCapacity(usize),
    #[error("kernel is already initialized")]
    AlreadyInitialized,
    #[error("port could not prepare a thread context")]
    ContextUnavailable,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
