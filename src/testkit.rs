//! Test helpers: booting host kernels and observing threads
//!
//! Thread entries only receive a `usize`, so shared test fixtures are leaked
//! and passed by address.
//!
//! Author: Moroya Sakamoto

use std::boxed::Box;
use std::string::String;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::host::HostPort;
use crate::kernel::Kernel;

/// Boot a fresh kernel with the default configuration
pub(crate) fn boot() -> &'static Kernel<HostPort> {
    boot_with(Config::DEFAULT)
}

pub(crate) fn boot_with(config: Config) -> &'static Kernel<HostPort> {
    let kernel: &'static Kernel<HostPort> =
        Box::leak(Box::new(Kernel::new(HostPort::new(), config)));
    kernel.init().expect("kernel init");
    kernel
}

/// Leak `value` and return its address as a thread argument
pub(crate) fn leak<T: Sync + 'static>(value: T) -> usize {
    Box::leak(Box::new(value)) as *const T as usize
}

/// Recover a fixture passed with [`leak`]
pub(crate) fn probe<T: Sync + 'static>(arg: usize) -> &'static T {
    // SAFETY: `arg` always comes from `leak::<T>`
    unsafe { &*(arg as *const T) }
}

/// Ordered record of events
pub(crate) struct Tokens(Mutex<String>);

impl Tokens {
    pub fn new() -> Self {
        Self(Mutex::new(String::new()))
    }

    pub fn push(&self, token: char) {
        self.0.lock().unwrap().push(token);
    }

    pub fn push_str(&self, tokens: &str) {
        self.0.lock().unwrap().push_str(tokens);
    }

    /// Everything recorded so far, clearing the record
    pub fn take(&self) -> String {
        core::mem::take(&mut *self.0.lock().unwrap())
    }
}

pub(crate) struct Counter(AtomicU32);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}
