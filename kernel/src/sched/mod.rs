//! Process scheduling.
//!
//! The scheduler is reached only through the [`Scheduler`] trait so the
//! election policy stays swappable; exactly one instance (round-robin) is
//! ever live. Callers get at it through [`with`], which scopes the lock —
//! nothing may hold it across a context switch.

pub mod round_robin;

use core::ptr::NonNull;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::process::Process;
pub use round_robin::RoundRobin;

/// The contract every election policy implements.
pub trait Scheduler {
    /// The process currently owning the CPU, if any.
    fn current(&mut self) -> Option<NonNull<Process>>;
    /// Make a new, fully initialized process electable.
    fn add(&mut self, process: NonNull<Process>);
    /// Elect the process that should run next. May return the current one.
    fn next(&mut self) -> Option<NonNull<Process>>;
    /// Withdraw a process. If it was the current one, a following call to
    /// `next` must still be well-defined.
    fn exit(&mut self, process: NonNull<Process>);
}

lazy_static! {
    static ref SCHEDULER: Mutex<RoundRobin> = Mutex::new(RoundRobin::new());
}

/// Run `f` against the one live scheduler. The lock is released before `f`'s
/// result is returned, so never call this re-entrantly from `f`.
pub fn with<R>(f: impl FnOnce(&mut dyn Scheduler) -> R) -> R {
    let mut scheduler = SCHEDULER.lock();
    f(&mut *scheduler)
}

/// Announce the scheduling policy. The instance itself is created lazily.
pub fn init() {
    with(|_| ());
    log::info!("scheduler: round-robin");
}

/// PIDs of every electable process, for diagnostics.
pub fn pids() -> alloc::vec::Vec<u32> {
    SCHEDULER.lock().pids()
}
