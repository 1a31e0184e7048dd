//! The preload-based supervisor variant: the child is launched with `LD_PRELOAD` pointed at an
//! injected shim, and reaped asynchronously. The shim's own shared-memory IPC protocol that would
//! let it report individual blocking syscalls back to the supervisor is an out-of-scope
//! collaborator (SPEC_FULL.md §4.2): this variant authors no such shim, and instead models the
//! externally observable lifecycle (running / exited / exit code) of a preload-supervised child.
use std::os::fd::RawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::error::ProcessError;
use crate::thread::{Thread, ThreadId};

pub struct PreloadThread {
    id: ThreadId,
    name: String,
    exe_path: PathBuf,
    /// Path to the shim shared library injected via `LD_PRELOAD`, if configured.
    shim_path: Option<PathBuf>,
    child: Option<Child>,
    running: bool,
    return_code: Option<i32>,
}

impl PreloadThread {
    pub fn new(id: ThreadId, name: String, exe_path: PathBuf, shim_path: Option<PathBuf>) -> Self {
        Self {
            id,
            name,
            exe_path,
            shim_path,
            child: None,
            running: false,
            return_code: None,
        }
    }

    fn poll(&mut self) -> Result<(), ProcessError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("thread {} (pid {}) exited: {status:?}", self.id, child.id());
                self.running = false;
                self.return_code = Some(
                    status
                        .code()
                        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)),
                );
            }
            Ok(None) => self.running = true,
            Err(source) => {
                return Err(ProcessError::Spawn {
                    name: self.name.clone(),
                    exe_path: self.exe_path.clone(),
                    source,
                })
            }
        }
        Ok(())
    }
}

impl Thread for PreloadThread {
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
        let mut cmd = Command::new(&self.exe_path);
        if argv.len() > 1 {
            cmd.args(&argv[1..]);
        }

        cmd.env_clear();
        for entry in envv {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }
        if let Some(shim) = &self.shim_path {
            cmd.env("LD_PRELOAD", shim);
        }

        // Duplicate the caller's fds before handing them to `Stdio`: `Stdio::from_raw_fd` takes
        // ownership and closes it after spawning, but `stdout_fd`/`stderr_fd` are owned by the
        // process's own log-file handles and must stay open past this call.
        let stdout_dup = nix::unistd::dup(stdout_fd).map_err(|source| ProcessError::Spawn {
            name: self.name.clone(),
            exe_path: self.exe_path.clone(),
            source: std::io::Error::from(source),
        })?;
        let stderr_dup = nix::unistd::dup(stderr_fd).map_err(|source| ProcessError::Spawn {
            name: self.name.clone(),
            exe_path: self.exe_path.clone(),
            source: std::io::Error::from(source),
        })?;
        // SAFETY: both fds were just returned by `dup` and are not otherwise in use.
        cmd.stdout(unsafe { Stdio::from_raw_fd(stdout_dup) });
        cmd.stderr(unsafe { Stdio::from_raw_fd(stderr_dup) });

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            name: self.name.clone(),
            exe_path: self.exe_path.clone(),
            source,
        })?;
        self.child = Some(child);
        self.running = true;
        self.poll()
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        if !self.running {
            return Ok(());
        }
        self.poll()
    }

    fn terminate(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if self.running {
                let _ = child.kill();
                let _ = child.wait();
                self.running = false;
                if self.return_code.is_none() {
                    self.return_code = Some(137);
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
