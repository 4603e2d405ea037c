//! Execution port: platform context transfer
//!
//! The kernel decides *which* thread runs; a [`Port`] performs the transfer.
//! Firmware ports save and restore register frames; the host port
//! ([`crate::host::HostPort`], feature `std`) parks OS threads.
//!
//! Author: Moroya Sakamoto

use critical_section::RestoreState;

use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::thread::ThreadId;

/// Platform context-transfer primitive
///
/// # Safety
///
/// Implementations must run exactly one kernel thread at a time and must
/// honour the critical-section hand-off described on each method.
pub unsafe trait Port: Sized + Sync + 'static {
    /// Build the execution context of `thread`
    ///
    /// On its first dispatch the context calls
    /// [`Kernel::thread_main`] with the critical section released.
    fn prepare(&self, kernel: &'static Kernel<Self>, thread: ThreadId) -> Result<(), KernelError>;

    /// Transfer control from `from` to `to`
    ///
    /// Called with the critical section held under `restore`. Returns when
    /// `from` is dispatched again, holding the section under the returned
    /// state.
    ///
    /// # Safety
    ///
    /// `from` must be the calling context and `restore` the state of the
    /// section it currently holds.
    unsafe fn switch(&self, from: ThreadId, to: ThreadId, restore: RestoreState) -> RestoreState;

    /// Transfer control from the terminated `from` to `to`
    ///
    /// Releases the section. On firmware this never returns; on the host it
    /// returns so the backing OS thread can exit, and the caller must not
    /// touch the kernel afterwards.
    ///
    /// # Safety
    ///
    /// Same as [`Port::switch`]; `from` must never be dispatched again.
    unsafe fn finish(&self, from: ThreadId, to: ThreadId, restore: RestoreState);

    /// One iteration of the idle thread's loop
    fn idle(&self, _kernel: &'static Kernel<Self>) {
        core::hint::spin_loop();
    }
}
