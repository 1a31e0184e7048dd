//! The interposition boundary (SPEC_FULL.md §4.2): an abstract `Thread` that a [`Process`] drives
//! through `run`/`resume`/`terminate`, implemented by two variants selected by [`InterposeMethod`].
//!
//! [`Process`]: crate::process::Process
pub mod preload_thread;
pub mod ptrace_thread;

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::ProcessError;

/// The two interposition variants a [`Process`](crate::process::Process) may be configured with,
/// per SPEC_FULL.md §6. Immutable once a process is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterposeMethod {
    /// The supervisor attaches to the child via `ptrace(2)` and single-steps on syscalls.
    Ptrace,
    /// The child is launched with an injected shared library that redirects libc/syscall entry
    /// points via shared-memory IPC.
    Preload,
}

/// Identity used for logs; distinct from the native OS pid/tid. Assigned from a process's
/// `thread_id_counter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The abstract Thread operations of SPEC_FULL.md §4.2. `Thread` is the sole writer of the native
/// process state; `Process` is the sole owner of the `Thread` (modeled as `ThreadHandle` below, a
/// shared pointer so a `Waiter` can hold a transient clone across a wait window — see
/// SPEC_FULL.md §9).
pub trait Thread {
    fn id(&self) -> ThreadId;

    /// Spawns the child and drives it to its first blocking point or exit. `stdout_fd`/`stderr_fd`
    /// become the child's stdout/stderr.
    fn run(
        &mut self,
        argv: &[String],
        envv: &[String],
        stdout_fd: RawFd,
        stderr_fd: RawFd,
    ) -> Result<(), ProcessError>;

    /// Continues execution after the event that was awaited has occurred, until the next blocking
    /// point or exit.
    fn resume(&mut self) -> Result<(), ProcessError>;

    /// Force-stops the child. Idempotent once the child is no longer running.
    fn terminate(&mut self);

    /// Whether the child is still alive and has not yet exited.
    fn is_running(&self) -> bool;

    /// Defined only once `is_running()` is false.
    fn return_code(&self) -> Option<i32>;
}

/// Shared handle to a `Thread` trait object. `Process` is the conceptual exclusive owner, but a
/// `Waiter` needs to hold the same thread across the window between arming a wait and the
/// `process.continue(waiter.thread)` call in `notify_status_changed`, so ownership is modeled as
/// `Rc<RefCell<_>>` rather than a bare `Box` (SPEC_FULL.md §9's redesign note).
pub type ThreadHandle = Rc<RefCell<Box<dyn Thread>>>;

/// Constructs the `Thread` a `Process` drives, given the id it should report. `Process` defaults
/// to one built from its `InterposeMethod`, but accepts a factory override so tests can substitute
/// a mock `Thread` without forking a real child (SPEC_FULL.md §8's mock-thread scenarios).
pub type ThreadFactory = Rc<dyn Fn(ThreadId) -> Box<dyn Thread>>;
