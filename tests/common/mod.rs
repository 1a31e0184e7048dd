//! Shared test doubles: a synchronous scheduler, a minimal host, a scriptable mock thread, and a
//! mock descriptor — standing in for the out-of-scope collaborators referenced only through
//! `simproc`'s trait boundaries.
#![allow(dead_code)]
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use simproc::descriptor::{Descriptor, DescriptorListener, DescriptorStatus, StatusSource};
use simproc::error::ProcessError;
use simproc::host::Host;
use simproc::thread::{Thread, ThreadFactory, ThreadHandle, ThreadId};
use simproc::{Scheduler, SimulationTime};

/// Initializes `env_logger` once per test binary, so `RUST_LOG=debug cargo test -- --nocapture`
/// surfaces the crate's lifecycle logging. Safe to call from every test; only the first call wins.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A single-threaded event loop: tasks are ordered by deadline, then insertion order, matching
/// `Scheduler::schedule_task`'s "same deadline runs in insertion order" contract.
pub struct MockScheduler {
    now: Cell<SimulationTime>,
    tasks: RefCell<Vec<(SimulationTime, u64, Option<Box<dyn FnOnce()>>)>>,
    seq: Cell<u64>,
}

impl MockScheduler {
    pub fn new(start: SimulationTime) -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(start),
            tasks: RefCell::new(Vec::new()),
            seq: Cell::new(0),
        })
    }

    /// Runs every pending task due at or before `target`, advancing `now` to each task's own
    /// deadline as it fires, then to `target` itself if nothing remained to run.
    pub fn run_until(&self, target: SimulationTime) {
        loop {
            let next_index = {
                let tasks = self.tasks.borrow();
                tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, (time, _, _))| *time <= target)
                    .min_by_key(|(_, (time, seq, _))| (*time, *seq))
                    .map(|(i, _)| i)
            };
            let Some(index) = next_index else { break };
            let (time, _, task) = self.tasks.borrow_mut().remove(index);
            self.now.set(time);
            if let Some(task) = task {
                task();
            }
        }
        if self.now.get() < target {
            self.now.set(target);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Scheduler for MockScheduler {
    fn current_time(&self) -> SimulationTime {
        self.now.get()
    }

    fn schedule_task(&self, task: Box<dyn FnOnce()>, delay: SimulationTime) {
        let deadline = self.now.get() + delay;
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.tasks.borrow_mut().push((deadline, seq, Some(task)));
    }
}

pub struct MockHost {
    name: String,
    data_dir: PathBuf,
    cpu_delay: Cell<SimulationTime>,
    tracker_delay: Cell<SimulationTime>,
}

impl MockHost {
    pub fn new(name: &str, data_dir: PathBuf) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            data_dir,
            cpu_delay: Cell::new(0),
            tracker_delay: Cell::new(0),
        })
    }

    pub fn cpu_delay(&self) -> SimulationTime {
        self.cpu_delay.get()
    }

    pub fn tracker_delay(&self) -> SimulationTime {
        self.tracker_delay.get()
    }
}

impl Host for MockHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn cpu_add_delay(&self, delay: SimulationTime) {
        self.cpu_delay.set(self.cpu_delay.get() + delay);
    }

    fn tracker_add_processing_time(&self, delay: SimulationTime) {
        self.tracker_delay.set(self.tracker_delay.get() + delay);
    }
}

/// Observable state of a [`MockThread`], kept in an `Rc` the test retains a handle to separately
/// from the `Box<dyn Thread>` that `Process` owns.
#[derive(Default)]
pub struct MockThreadState {
    pub running: bool,
    pub return_code: Option<i32>,
    pub run_calls: u32,
    pub resume_calls: u32,
    pub terminate_calls: u32,
}

/// A `Thread` whose `run`/`resume` outcomes are scripted up front, so lifecycle tests don't need a
/// real child process to exercise blocking/resuming/exiting.
pub struct MockThread {
    id: ThreadId,
    state: Rc<RefCell<MockThreadState>>,
    on_run: (bool, Option<i32>),
    on_resume: RefCell<VecDeque<(bool, Option<i32>)>>,
}

impl Thread for MockThread {
    fn id(&self) -> ThreadId {
        self.id
    }

    fn run(
        &mut self,
        _argv: &[String],
        _envv: &[String],
        _stdout_fd: RawFd,
        _stderr_fd: RawFd,
    ) -> Result<(), ProcessError> {
        let mut state = self.state.borrow_mut();
        state.run_calls += 1;
        state.running = self.on_run.0;
        state.return_code = self.on_run.1;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.borrow_mut();
        state.resume_calls += 1;
        if let Some((running, code)) = self.on_resume.borrow_mut().pop_front() {
            state.running = running;
            state.return_code = code;
        }
        Ok(())
    }

    fn terminate(&mut self) {
        let mut state = self.state.borrow_mut();
        state.terminate_calls += 1;
        if state.running {
            state.running = false;
            state.return_code.get_or_insert(137);
        }
    }

    fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    fn return_code(&self) -> Option<i32> {
        self.state.borrow().return_code
    }
}

/// Builds a [`ThreadFactory`] producing `MockThread`s that all share one `MockThreadState`, plus a
/// handle to that state for assertions. `on_run` is the running/return-code pair reported the
/// moment `run` completes; `on_resume` is consumed one entry per `resume` call (a thread with no
/// more scripted outcomes keeps whatever state `run`/a prior `resume` left it in).
pub fn mock_thread_factory(
    on_run: (bool, Option<i32>),
    on_resume: Vec<(bool, Option<i32>)>,
) -> (ThreadFactory, Rc<RefCell<MockThreadState>>) {
    let state = Rc::new(RefCell::new(MockThreadState::default()));
    let state_for_factory = Rc::clone(&state);
    let script = VecDeque::from(on_resume);
    let factory: ThreadFactory = Rc::new(move |id| {
        Box::new(MockThread {
            id,
            state: Rc::clone(&state_for_factory),
            on_run,
            on_resume: RefCell::new(script.clone()),
        })
    });
    (factory, state)
}

/// Builds a bare `ThreadHandle` (not routed through any `Process`), for tests that exercise
/// `Waiter` directly. Returns the handle alongside its shared state for assertions.
pub fn mock_thread_handle(id: ThreadId, running: bool) -> (ThreadHandle, Rc<RefCell<MockThreadState>>) {
    let state = Rc::new(RefCell::new(MockThreadState {
        running,
        ..Default::default()
    }));
    let handle: ThreadHandle = Rc::new(RefCell::new(Box::new(MockThread {
        id,
        state: Rc::clone(&state),
        on_run: (running, None),
        on_resume: RefCell::new(VecDeque::new()),
    })));
    (handle, state)
}

/// A simulated descriptor whose status a test can flip directly, firing any attached listeners.
pub struct MockDescriptor {
    status: Cell<DescriptorStatus>,
    listeners: RefCell<Vec<Rc<DescriptorListener>>>,
}

impl MockDescriptor {
    pub fn new(initial: DescriptorStatus) -> Rc<Self> {
        Rc::new(Self {
            status: Cell::new(initial),
            listeners: RefCell::new(Vec::new()),
        })
    }

    pub fn set_status(&self, new_status: DescriptorStatus) {
        self.status.set(new_status);
        let listeners: Vec<_> = self.listeners.borrow().iter().cloned().collect();
        for listener in listeners {
            listener.notify(new_status);
        }
    }
}

impl StatusSource for MockDescriptor {
    fn add_listener(&self, listener: Rc<DescriptorListener>) {
        self.listeners.borrow_mut().push(listener);
    }

    fn remove_listener(&self, listener: &Rc<DescriptorListener>) {
        self.listeners
            .borrow_mut()
            .retain(|l| !Rc::ptr_eq(l, listener));
    }
}

impl Descriptor for MockDescriptor {
    fn status(&self) -> DescriptorStatus {
        self.status.get()
    }
}
