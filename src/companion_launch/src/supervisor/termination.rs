//! Program termination
//!
//! Termination is synchronous so it can also run from a `Drop` guard.
//! Async callers go through `tokio::task::spawn_blocking`.

use super::{Supervisor, TrackedProcess};
use crate::process::control::{ProcessStatus, SignalOutcome};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often to re-check a process while it is given time to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for a SIGKILLed process to be reaped
const REAP_TIMEOUT: Duration = Duration::from_millis(200);

impl Supervisor {
    /// Terminate the program called `name`.
    ///
    /// Returns true when the program is gone (including when it was
    /// terminated earlier in this run) and false when nothing by that name
    /// is tracked or the OS refused the kill.
    pub fn terminate(&self, name: &str) -> bool {
        let tracked = {
            let mut registry = self.registry();
            if registry.terminated.contains(name) {
                debug!("Program '{}' already terminated", name);
                return true;
            }
            let Some(tracked) = registry.tracked.remove(name) else {
                warn!("Cannot terminate '{}': not in the active process list", name);
                return false;
            };
            // Recorded before any signal is sent: concurrent callers now
            // return early instead of signalling a second time
            registry.terminated.insert(name.to_string());
            registry.unminimized.remove(name);
            tracked
        };

        self.stop_process(tracked)
    }

    /// Terminate every tracked program and clear all tracking state.
    /// Safe to call any number of times.
    pub fn terminate_all(&self) {
        let names: Vec<String> = {
            let mut registry = self.registry();
            registry.closed = true;
            if registry.tracked.is_empty() {
                return;
            }
            registry.tracked.keys().cloned().collect()
        };

        info!("Terminating all started programs...");
        for name in &names {
            if !self.terminate(name) {
                warn!("Program '{}' may still be running", name);
            }
        }

        let mut registry = self.registry();
        registry.tracked.clear();
        registry.unminimized.clear();
        registry.terminated.clear();
        registry.main = None;
        drop(registry);

        info!("All programs have been terminated");
    }

    /// Terminate a process that was refused registration
    pub(crate) fn discard(&self, tracked: TrackedProcess) {
        warn!(
            "Shutdown in progress, terminating late-started '{}' (PID {})",
            tracked.name, tracked.pid
        );
        self.stop_process(tracked);
    }

    /// SIGTERM, wait for the grace window, then SIGKILL
    fn stop_process(&self, mut tracked: TrackedProcess) -> bool {
        let name = tracked.name.clone();
        let pid = tracked.pid;

        if tracked.has_exited() {
            info!("Program '{}' (PID {}) had already exited", name, pid);
            return true;
        }

        info!("Terminating program: {} (PID {})", name, pid);
        match tracked.child.terminate() {
            Ok(SignalOutcome::AlreadyGone) => {
                debug!("'{}' (PID {}) was gone before SIGTERM", name, pid);
                return true;
            }
            Ok(SignalOutcome::Delivered) => {}
            Err(e) => warn!("Failed to send SIGTERM to '{}' (PID {}): {}", name, pid, e),
        }

        if wait_for_exit(&mut tracked, self.timings.termination_grace) {
            debug!("'{}' (PID {}) exited gracefully", name, pid);
            return true;
        }

        warn!(
            "Program '{}' (PID {}) did not exit gracefully, sending SIGKILL",
            name, pid
        );
        match tracked.child.kill() {
            Ok(_) => {
                wait_for_exit(&mut tracked, REAP_TIMEOUT);
                true
            }
            Err(e) => {
                error!("Error terminating '{}' (PID {}): {}", name, pid, e);
                false
            }
        }
    }
}

fn wait_for_exit(tracked: &mut TrackedProcess, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        match tracked.child.poll() {
            Ok(ProcessStatus::Exited { code }) => {
                debug!("'{}' exited with code {:?}", tracked.name, code);
                return true;
            }
            Ok(ProcessStatus::Running) => {}
            Err(e) => {
                debug!("Status check for '{}' failed: {}", tracked.name, e);
            }
        }
        if start.elapsed() >= timeout {
            return false;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
}
