//! OS process primitives
//!
//! The supervisor never touches `std::process` or signals directly. It goes
//! through [`ProcessControl`] and [`ChildProcess`] so the startup and
//! termination logic can run against fakes in tests.
//!
//! # Design
//! - Expected conditions are values: a missing process is [`Liveness::Gone`],
//!   a signal to an exited process is [`SignalOutcome::AlreadyGone`]
//! - Only genuinely unexpected failures surface as errors

use eyre::{eyre, Result};
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::{
    io,
    path::Path,
    process::{Command, Stdio},
    sync::Mutex,
};
use tracing::debug;

/// What a liveness query found for a pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Terminated but not yet reaped by its parent
    Zombie,
    Gone,
}

impl Liveness {
    /// A zombie counts as not running
    pub fn is_alive(self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Exit state of a child we spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited { code: Option<i32> },
}

/// Result of delivering a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    AlreadyGone,
}

/// Parameters for spawning one program
#[derive(Debug, Clone, Copy)]
pub struct SpawnRequest<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    /// Detach from the controlling terminal: no stdin, own process group.
    /// Helpers are detached; the user-facing main program is not.
    pub detached: bool,
}

/// A spawned child process owned by the supervisor
pub trait ChildProcess: Send {
    fn pid(&self) -> u32;

    /// Non-blocking exit check. Reaps the child if it has exited.
    fn poll(&mut self) -> io::Result<ProcessStatus>;

    /// Polite termination request (SIGTERM)
    fn terminate(&mut self) -> io::Result<SignalOutcome>;

    /// Unconditional kill (SIGKILL)
    fn kill(&mut self) -> io::Result<SignalOutcome>;
}

/// Process spawning and pid liveness queries
pub trait ProcessControl: Send + Sync {
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Box<dyn ChildProcess>>;

    fn probe(&self, pid: u32) -> Result<Liveness>;
}

/// Real OS backend: `std::process` for spawning, `nix` for signals and
/// `sysinfo` for liveness
pub struct OsProcesses {
    system: Mutex<sysinfo::System>,
}

impl OsProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for OsProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for OsProcesses {
    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(request.program);
        cmd.args(request.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if request.detached {
            use std::os::unix::process::CommandExt;
            cmd.stdin(Stdio::null()).process_group(0);
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        debug!(
            "Spawned {} (PID {}, detached: {})",
            request.program.display(),
            pid,
            request.detached
        );
        Ok(Box::new(OsChild { child, pid }))
    }

    fn probe(&self, pid: u32) -> Result<Liveness> {
        use sysinfo::{ProcessStatus as SysStatus, ProcessesToUpdate};

        let mut system = self
            .system
            .lock()
            .map_err(|_| eyre!("process table lock poisoned"))?;
        let sys_pid = sysinfo::Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

        let liveness = match system.process(sys_pid) {
            None => Liveness::Gone,
            Some(process) if process.status() == SysStatus::Zombie => Liveness::Zombie,
            Some(_) => Liveness::Alive,
        };
        Ok(liveness)
    }
}

struct OsChild {
    child: std::process::Child,
    pid: u32,
}

impl OsChild {
    fn signal(&mut self, sig: Signal) -> io::Result<SignalOutcome> {
        // Never signal a pid we have already reaped: it may have been reused
        if let ProcessStatus::Exited { .. } = self.poll()? {
            return Ok(SignalOutcome::AlreadyGone);
        }

        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyGone),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

impl ChildProcess for OsChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn poll(&mut self) -> io::Result<ProcessStatus> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessStatus::Exited {
                code: status.code(),
            },
            None => ProcessStatus::Running,
        })
    }

    fn terminate(&mut self) -> io::Result<SignalOutcome> {
        self.signal(Signal::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<SignalOutcome> {
        self.signal(Signal::SIGKILL)
    }
}
