use companion_launch::{
    program::{MinimizePolicy, ProgramSpec},
    supervisor::{Supervisor, Timings},
    window::NoWindows,
    OsProcesses,
};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

/// Absolute path of a system binary, looked up on `$PATH`.
pub fn system_bin(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| panic!("`{name}` not found on PATH"))
}

/// Minimization policy that gives up quickly; tests run without a window system.
pub fn quick_policy() -> MinimizePolicy {
    MinimizePolicy {
        max_attempts: 1,
        retry_delay: Duration::from_millis(50),
        timeout: Duration::from_millis(500),
        initial_delay: Duration::ZERO,
    }
}

/// A helper that sleeps for `secs` seconds
pub fn sleeper(name: &str, secs: u32) -> ProgramSpec {
    ProgramSpec::new(name, system_bin("sleep"))
        .with_arguments([secs.to_string()])
        .with_minimize_policy(quick_policy())
}

/// A helper whose process ignores SIGTERM and only dies to SIGKILL
pub fn sigterm_ignorer(name: &str) -> ProgramSpec {
    ProgramSpec::new(name, system_bin("sh"))
        .with_arguments(["-c", "trap '' TERM; exec sleep 60"])
        .with_minimize_policy(quick_policy())
}

/// Supervisor over real OS processes and no window system
pub fn supervisor() -> Arc<Supervisor> {
    supervisor_with(Timings::default())
}

pub fn supervisor_with(timings: Timings) -> Arc<Supervisor> {
    Supervisor::new(Arc::new(OsProcesses::new()), Arc::new(NoWindows), timings)
}

/// Whether `pid` still names a process (zombies included)
pub fn pid_exists(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Poll `condition` every 50 ms until it holds or `timeout` passes.
/// Returns the time it took, or `None` on timeout.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Option<Duration> {
    let start = Instant::now();
    loop {
        if condition() {
            return Some(start.elapsed());
        }
        if start.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
