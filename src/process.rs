//! The per-guest-program controller (SPEC_FULL.md §4.1): owns the native [`Thread`], schedules
//! start/stop against the virtual clock, opens stdout/stderr log files, and routes waiter resume
//! notifications back into the guest.
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cpu::CpuAccounting;
use crate::error::ProcessError;
use crate::host::Host;
use crate::scheduler::{delay_until, Scheduler, SimulationTime};
use crate::thread::preload_thread::PreloadThread;
use crate::thread::ptrace_thread::PtraceThread;
use crate::thread::{InterposeMethod, Thread, ThreadFactory, ThreadHandle, ThreadId};
use crate::utility::ObjectCounter;

/// Counts guest exits observed with a nonzero return code, across every `Process` in the
/// simulation, per SPEC_FULL.md §6's "Observed exit code logging".
static PLUGIN_ERROR_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn plugin_error_count() -> u64 {
    PLUGIN_ERROR_COUNT.load(Ordering::Relaxed)
}

/// Numeric process id, unique within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

std::thread_local! {
    /// The per-worker "active process" slot (SPEC_FULL.md §5, §9): set on entry to guest code so
    /// the (out-of-scope) syscall interception layer can route intercepted calls back to the
    /// owning `Process`, and cleared on every exit path via [`ActiveProcessGuard`].
    static ACTIVE_PROCESS: Cell<Option<ProcessId>> = const { Cell::new(None) };
}

/// Returns the id of the `Process` currently executing guest code on this worker, if any.
pub fn active_process() -> Option<ProcessId> {
    ACTIVE_PROCESS.with(|cell| cell.get())
}

/// RAII guard that marks a process active for the duration of a guest-code span and clears the
/// slot on every exit path, including unwinding panics.
struct ActiveProcessGuard;

impl ActiveProcessGuard {
    fn new(id: ProcessId) -> Self {
        ACTIVE_PROCESS.with(|cell| cell.set(Some(id)));
        Self
    }
}

impl Drop for ActiveProcessGuard {
    fn drop(&mut self) {
        ACTIVE_PROCESS.with(|cell| cell.set(None));
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
}

pub struct Process {
    host: Rc<dyn Host>,
    id: ProcessId,
    name: String,
    interpose_method: InterposeMethod,
    exe_name: String,
    exe_path: PathBuf,
    /// Shim shared library to inject via `LD_PRELOAD`, consulted only by [`InterposeMethod::Preload`].
    preload_shim_path: Option<PathBuf>,
    /// Overrides the default `interpose_method`-driven `Thread` construction; `None` in production.
    thread_factory: Option<ThreadFactory>,
    argv: Vec<String>,
    envv: Vec<String>,
    start_time: SimulationTime,
    stop_time: SimulationTime,
    total_run_time: Cell<f64>,
    main_thread: RefCell<Option<ThreadHandle>>,
    return_code: Cell<Option<i32>>,
    logged_exit: Cell<bool>,
    /// Set by [`Self::stop`] before it forces `thread.terminate()`, so [`Self::check`] can tell a
    /// simulator-initiated kill apart from the guest exiting on its own (SPEC_FULL.md §8 scenario 2
    /// vs §6's plugin-error accounting).
    terminated_by_stop: Cell<bool>,
    stdout: RefCell<Option<File>>,
    stderr: RefCell<Option<File>>,
    thread_id_counter: Cell<u32>,
    is_executing: Cell<bool>,
    _counter: ObjectCounter,
}

impl Process {
    /// Stores configuration; does not open files or spawn a thread (SPEC_FULL.md §4.1).
    ///
    /// Panics if `exe_name` or `exe_path` is empty — a caller contract violation, not a runtime
    /// condition a simulation should recover from.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: Rc<dyn Host>,
        id: ProcessId,
        start_time: SimulationTime,
        stop_time: SimulationTime,
        interpose_method: InterposeMethod,
        host_name: &str,
        exe_name: &str,
        exe_path: PathBuf,
        envv: Vec<String>,
        argv: Vec<String>,
        preload_shim_path: Option<PathBuf>,
    ) -> Rc<Self> {
        Self::new_with_thread_factory(
            host,
            id,
            start_time,
            stop_time,
            interpose_method,
            host_name,
            exe_name,
            exe_path,
            envv,
            argv,
            preload_shim_path,
            None,
        )
    }

    /// As [`Self::new`], but drives the process with `thread_factory` instead of building a
    /// [`PtraceThread`]/[`PreloadThread`] from `interpose_method` — the seam integration tests use
    /// to substitute a mock [`Thread`].
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_thread_factory(
        host: Rc<dyn Host>,
        id: ProcessId,
        start_time: SimulationTime,
        stop_time: SimulationTime,
        interpose_method: InterposeMethod,
        host_name: &str,
        exe_name: &str,
        exe_path: PathBuf,
        envv: Vec<String>,
        argv: Vec<String>,
        preload_shim_path: Option<PathBuf>,
        thread_factory: Option<ThreadFactory>,
    ) -> Rc<Self> {
        assert!(!exe_name.is_empty(), "process requires an executable name");
        assert!(
            !exe_path.as_os_str().is_empty(),
            "process requires an executable path"
        );

        let name = format!("{host_name}.{exe_name}.{id}");
        Rc::new(Self {
            host,
            id,
            name,
            interpose_method,
            exe_name: exe_name.to_string(),
            exe_path,
            preload_shim_path,
            thread_factory,
            argv,
            envv,
            start_time,
            stop_time,
            total_run_time: Cell::new(0.0),
            main_thread: RefCell::new(None),
            return_code: Cell::new(None),
            logged_exit: Cell::new(false),
            terminated_by_stop: Cell::new(false),
            stdout: RefCell::new(None),
            stderr: RefCell::new(None),
            thread_id_counter: Cell::new(0),
            is_executing: Cell::new(false),
            _counter: ObjectCounter::new("Process"),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_interpose_method(&self) -> InterposeMethod {
        self.interpose_method
    }

    pub fn exe_name(&self) -> &str {
        &self.exe_name
    }

    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    pub fn total_run_time(&self) -> f64 {
        self.total_run_time.get()
    }

    pub fn return_code(&self) -> Option<i32> {
        self.return_code.get()
    }

    pub fn is_executing(&self) -> bool {
        self.is_executing.get()
    }

    /// `mainThread != null ∧ mainThread.isRunning()`.
    pub fn is_running(&self) -> bool {
        self.main_thread
            .borrow()
            .as_ref()
            .map(|handle| handle.borrow().is_running())
            .unwrap_or(false)
    }

    /// Called by [`crate::cpu::CpuAccounting`] after a guest-code span; adds to the process's own
    /// running-time accumulator (SPEC_FULL.md §4.4).
    pub(crate) fn add_runtime(&self, seconds: f64) {
        self.total_run_time.set(self.total_run_time.get() + seconds);
    }

    /// Reads current virtual time and posts up to two tasks to `scheduler`, per SPEC_FULL.md
    /// §4.1. Each posted task owns a clone of `self`; dropping the task (after it runs, or if the
    /// scheduler discards it unrun) releases that reference.
    pub fn schedule(self: &Rc<Self>, scheduler: &dyn Scheduler) {
        let now = scheduler.current_time();

        if self.stop_time == 0 || self.start_time < self.stop_time {
            let delay = delay_until(self.start_time, now);
            let process = Rc::clone(self);
            scheduler.schedule_task(
                Box::new(move || {
                    if let Err(error) = process.start() {
                        // I/O fatal / configuration fatal at start: SPEC_FULL.md §7 calls for
                        // aborting the host worker with a diagnostic.
                        panic!("fatal error starting process '{}': {error}", process.name);
                    }
                }),
                delay,
            );
        }

        if self.stop_time > 0 && self.stop_time > self.start_time {
            let delay = delay_until(self.stop_time, now);
            let process = Rc::clone(self);
            scheduler.schedule_task(Box::new(move || process.stop()), delay);
        }
    }

    fn next_thread_id(&self) -> u32 {
        let id = self.thread_id_counter.get();
        self.thread_id_counter.set(id + 1);
        id
    }

    fn new_thread(&self, id: ThreadId) -> Box<dyn Thread> {
        if let Some(factory) = &self.thread_factory {
            return factory(id);
        }
        match self.interpose_method {
            InterposeMethod::Ptrace => {
                Box::new(PtraceThread::new(id, self.name.clone(), self.exe_path.clone()))
            }
            InterposeMethod::Preload => Box::new(PreloadThread::new(
                id,
                self.name.clone(),
                self.exe_path.clone(),
                self.preload_shim_path.clone(),
            )),
        }
    }

    /// Fired by the start task. Idempotent against an already-running process.
    pub fn start(self: &Rc<Self>) -> Result<(), ProcessError> {
        if self.is_running() {
            return Ok(());
        }

        let stdout_path = self.host.data_dir().join(format!("{}.stdout", self.name));
        let stderr_path = self.host.data_dir().join(format!("{}.stderr", self.name));

        let stdout = open_log_file(&stdout_path).map_err(|source| ProcessError::LogFileOpen {
            name: self.name.clone(),
            path: stdout_path,
            source,
        })?;
        let stderr = open_log_file(&stderr_path).map_err(|source| ProcessError::LogFileOpen {
            name: self.name.clone(),
            path: stderr_path,
            source,
        })?;

        let tid = ThreadId(self.next_thread_id());
        let mut thread = self.new_thread(tid);
        log::debug!("process '{}': starting thread {tid}", self.name);

        let argv = self.argv.clone();
        let envv = self.envv.clone();
        let stdout_fd = stdout.as_raw_fd();
        let stderr_fd = stderr.as_raw_fd();

        let _active = ActiveProcessGuard::new(self.id);
        self.is_executing.set(true);
        let run_result =
            CpuAccounting::time(self.host.as_ref(), self, || thread.run(&argv, &envv, stdout_fd, stderr_fd));
        self.is_executing.set(false);
        drop(_active);

        *self.stdout.borrow_mut() = Some(stdout);
        *self.stderr.borrow_mut() = Some(stderr);

        run_result?;

        *self.main_thread.borrow_mut() = Some(Rc::new(RefCell::new(thread)));
        self.check();
        Ok(())
    }

    /// No-op if not running. `thread` defaults to the main thread when absent, per SPEC_FULL.md
    /// §4.1's `continue(process, thread?)`.
    pub fn continue_process(self: &Rc<Self>, thread: Option<ThreadHandle>) {
        if !self.is_running() {
            return;
        }

        let handle = thread.unwrap_or_else(|| {
            self.main_thread
                .borrow()
                .clone()
                .expect("is_running() implies main_thread is Some")
        });

        let _active = ActiveProcessGuard::new(self.id);
        self.is_executing.set(true);
        let result = CpuAccounting::time(self.host.as_ref(), self, || handle.borrow_mut().resume());
        self.is_executing.set(false);
        drop(_active);

        if let Err(error) = result {
            log::error!("process '{}': error resuming thread: {error}", self.name);
        }

        self.check();
    }

    /// Terminates the main thread if present; the actual "thread has stopped, log once, null the
    /// pointer" handling happens in [`Self::check`], which this always calls afterward — see
    /// SPEC_FULL.md §9's resolution of the `stop()`-vs-`check()` open question. Marks the kill as
    /// simulator-initiated so `check()` doesn't mistake the forced exit code for a guest error.
    pub fn stop(self: &Rc<Self>) {
        let _active = ActiveProcessGuard::new(self.id);

        if let Some(handle) = self.main_thread.borrow().clone() {
            self.terminated_by_stop.set(true);
            self.is_executing.set(true);
            CpuAccounting::time(self.host.as_ref(), self, || handle.borrow_mut().terminate());
            self.is_executing.set(false);
        }

        drop(_active);
        self.check();
    }

    /// If no main thread: return. If still running: log "blocked waiting for events". Else: log
    /// the exit code once (unless this exit was a simulator-initiated `stop()`, which is not a
    /// guest error), terminate/null the thread, and log total runtime.
    fn check(self: &Rc<Self>) {
        let Some(handle) = self.main_thread.borrow().clone() else {
            return;
        };

        if handle.borrow().is_running() {
            log::info!("process '{}': blocked waiting for events", self.name);
            return;
        }

        if !self.logged_exit.get() {
            self.logged_exit.set(true);
            let code = handle.borrow().return_code().unwrap_or(0);
            self.return_code.set(Some(code));
            if self.terminated_by_stop.get() {
                log::info!("process '{}': stopped by the simulator", self.name);
            } else if code == 0 {
                log::info!("main success code '0' for process '{}'", self.name);
            } else {
                log::error!("main error code '{code}' for process '{}'", self.name);
                PLUGIN_ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
            }
        }

        handle.borrow_mut().terminate();
        *self.main_thread.borrow_mut() = None;
        log::info!(
            "process '{}': total runtime {:.6}s",
            self.name,
            self.total_run_time.get()
        );
    }
}

impl Drop for Process {
    /// Freeing while the main thread is running first terminates it (SPEC_FULL.md §3).
    fn drop(&mut self) {
        if let Some(handle) = self.main_thread.borrow_mut().take() {
            if handle.borrow().is_running() {
                log::debug!("process '{}' freed while still running; terminating", self.name);
                handle.borrow_mut().terminate();
            }
        }
    }
}
