//! The ptrace-based supervisor variant: forks, `PTRACE_TRACEME` + `execvpe`, then drives the
//! child with `PTRACE_SYSCALL`/`waitpid`. Each syscall-stop the tracer observes is treated as a
//! blocking point (SPEC_FULL.md §4.2): the full argument/return-value rewriting that a real
//! interception engine performs is an out-of-scope collaborator (§1), so this variant only
//! implements the abstract `run`/`resume`/`terminate` lifecycle faithfully.
use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execvpe, fork, ForkResult, Pid};

use crate::error::ProcessError;
use crate::thread::{Thread, ThreadId};

pub struct PtraceThread {
    id: ThreadId,
    name: String,
    exe_path: PathBuf,
    pid: Option<Pid>,
    running: bool,
    return_code: Option<i32>,
}

impl PtraceThread {
    pub fn new(id: ThreadId, name: String, exe_path: PathBuf) -> Self {
        Self {
            id,
            name,
            exe_path,
            pid: None,
            running: false,
            return_code: None,
        }
    }

    fn to_cstrings(strs: &[String], name: &str) -> Result<Vec<CString>, ProcessError> {
        strs.iter()
            .map(|s| {
                CString::new(s.as_bytes()).map_err(|_| ProcessError::Spawn {
                    name: name.to_string(),
                    exe_path: PathBuf::new(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, "embedded NUL byte"),
                })
            })
            .collect()
    }

    /// Continues the traced child with `PTRACE_SYSCALL` and waits for its next stop, updating
    /// `running`/`return_code` from the result. One call models one "blocking point" per
    /// SPEC_FULL.md §4.2.
    fn step_to_next_stop(&mut self) -> Result<(), ProcessError> {
        let pid = self.pid.expect("step_to_next_stop called before spawn");

        ptrace::syscall(pid, None).map_err(|source| ProcessError::Ptrace {
            name: self.name.clone(),
            source,
        })?;

        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                log::debug!("thread {} (pid {pid}) exited with code {code}", self.id);
                self.running = false;
                self.return_code = Some(code);
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                log::debug!("thread {} (pid {pid}) killed by signal {signal:?}", self.id);
                self.running = false;
                self.return_code = Some(128 + signal as i32);
            }
            Ok(WaitStatus::PtraceSyscall(_)) | Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {
                self.running = true;
            }
            Ok(other) => {
                log::trace!("thread {} (pid {pid}) unexpected wait status {other:?}", self.id);
                self.running = true;
            }
            Err(source) => {
                return Err(ProcessError::Ptrace {
                    name: self.name.clone(),
                    source,
                })
            }
        }
        Ok(())
    }
}

impl Thread for PtraceThread {
    fn id(&self) -> ThreadId {
        self.id
    }

    fn run(
        &mut self,
        argv: &[String],
        envv: &[String],
        stdout_fd: RawFd,
        stderr_fd: RawFd,
    ) -> Result<(), ProcessError> {
        let exe_cstr = CString::new(self.exe_path.as_os_str().as_bytes()).map_err(|_| {
            ProcessError::Spawn {
                name: self.name.clone(),
                exe_path: self.exe_path.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "embedded NUL byte"),
            }
        })?;
        let argv_c = Self::to_cstrings(argv, &self.name)?;
        let envv_c = Self::to_cstrings(envv, &self.name)?;

        // SAFETY: the child immediately calls `ptrace::traceme` then `execvpe`, without
        // allocating or touching any shared state between fork and exec.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let _ = dup2(stdout_fd, libc::STDOUT_FILENO);
                let _ = dup2(stderr_fd, libc::STDERR_FILENO);
                if ptrace::traceme().is_err() {
                    std::process::exit(127);
                }
                let _ = execvpe(&exe_cstr, &argv_c, &envv_c);
                // execvpe only returns on failure.
                std::process::exit(127);
            }
            Ok(ForkResult::Parent { child }) => {
                self.pid = Some(child);
                match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, code)) => {
                        self.running = false;
                        self.return_code = Some(code);
                        return Ok(());
                    }
                    Ok(WaitStatus::Stopped(_, _)) => {
                        ptrace::setoptions(child, ptrace::Options::PTRACE_O_TRACESYSGOOD).map_err(
                            |source| ProcessError::Ptrace {
                                name: self.name.clone(),
                                source,
                            },
                        )?;
                        self.running = true;
                    }
                    Ok(_) => self.running = true,
                    Err(source) => {
                        return Err(ProcessError::Ptrace {
                            name: self.name.clone(),
                            source,
                        })
                    }
                }
            }
            Err(source) => {
                return Err(ProcessError::Spawn {
                    name: self.name.clone(),
                    exe_path: self.exe_path.clone(),
                    source: io::Error::from(source),
                })
            }
        }

        self.step_to_next_stop()
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        if !self.running {
            return Ok(());
        }
        self.step_to_next_stop()
    }

    fn terminate(&mut self) {
        if let Some(pid) = self.pid {
            if self.running {
                let _ = kill(pid, Signal::SIGKILL);
                let _ = waitpid(pid, None);
                self.running = false;
                if self.return_code.is_none() {
                    self.return_code = Some(128 + Signal::SIGKILL as i32);
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn return_code(&self) -> Option<i32> {
        self.return_code
    }
}
