use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::time::Duration;

/// RAII wrapper that spawns a process in its own process group and kills the
/// entire group on drop, so nothing outlives a failed test.
pub struct ManagedProcess {
    child: Child,
    pgid: i32,
}

impl ManagedProcess {
    /// Spawn `cmd` in a new session (and thus a new process group).
    pub fn spawn(cmd: &mut Command) -> io::Result<Self> {
        // Safety: setsid() is async-signal-safe and only affects the child.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let pgid = child.id() as i32;
        Ok(Self { child, pgid })
    }

    /// Return the PID of the child process.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Send `signal` to the whole process group.
    pub fn signal_group(&self, signal: i32) {
        unsafe {
            libc::kill(-self.pgid, signal);
        }
    }

    /// Reap the child if it has exited, without blocking.
    pub fn try_reap(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.signal_group(libc::SIGTERM);
        std::thread::sleep(Duration::from_millis(200));
        self.signal_group(libc::SIGKILL);
        // Reap zombie.
        let _ = self.child.wait();
    }
}
