//! Window minimization with retries
//!
//! Windows of a freshly started program often appear late, and some
//! window managers ignore an iconify request that arrives before the
//! window is fully mapped. A single attempt is therefore:
//!
//! 1. look up the program's windows,
//! 2. request minimization of each,
//! 3. wait a short settle delay,
//! 4. confirm every window reports the minimized state.
//!
//! [`MinimizationRetrier::minimize`] repeats attempts up to a count, and
//! [`MinimizationRetrier::minimize_persistently`] layers a wall-clock
//! deadline and liveness checks on top.

use crate::{
    process::control::ProcessControl,
    util::logging::is_verbose,
    window::{WindowHandle, WindowLocator},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Inner attempts per round of the persistent variant
const ATTEMPTS_PER_ROUND: u32 = 3;

/// Per-attempt detail, promoted to info with `--verbose`
macro_rules! attempt_log {
    ($($arg:tt)*) => {
        if is_verbose() {
            info!($($arg)*);
        } else {
            debug!($($arg)*);
        }
    };
}

pub struct MinimizationRetrier {
    windows: Arc<dyn WindowLocator>,
    control: Arc<dyn ProcessControl>,
    settle: Duration,
}

impl MinimizationRetrier {
    pub fn new(
        windows: Arc<dyn WindowLocator>,
        control: Arc<dyn ProcessControl>,
        settle: Duration,
    ) -> Self {
        Self {
            windows,
            control,
            settle,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.windows.backend_name()
    }

    /// Try up to `max_attempts` times to minimize every window of `pid`.
    /// Returns true as soon as one attempt confirms all windows minimized.
    pub async fn minimize(
        &self,
        pid: u32,
        name: &str,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> bool {
        let minimized = self.attempt(pid, name, max_attempts, retry_delay).await;
        if !minimized {
            warn!(
                name,
                pid,
                "Could not minimize '{}' after {} attempt(s)",
                name,
                max_attempts
            );
        }
        minimized
    }

    /// The attempt loop behind [`Self::minimize`]. Leaves the give-up
    /// warning to the caller.
    async fn attempt(
        &self,
        pid: u32,
        name: &str,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> bool {
        for attempt in 1..=max_attempts {
            let last = attempt == max_attempts;
            let found = self.windows.find_windows(pid);

            if found.is_empty() {
                attempt_log!(
                    name,
                    pid,
                    attempt,
                    "No windows found for '{}' (attempt {}/{})",
                    name,
                    attempt,
                    max_attempts
                );
                if last {
                    break;
                }
                tokio::time::sleep(retry_delay).await;
                continue;
            }

            for &window in &found {
                if !self.windows.set_minimized(window) {
                    debug!("Minimize request for window {} of '{}' was refused", window, name);
                }
            }

            tokio::time::sleep(self.settle).await;

            if self.all_minimized(&found, name) {
                info!(
                    name,
                    pid,
                    attempt,
                    "Minimized {} window(s) of '{}'",
                    found.len(),
                    name
                );
                return true;
            }

            attempt_log!(
                name,
                pid,
                attempt,
                "Windows of '{}' not minimized yet (attempt {}/{})",
                name,
                attempt,
                max_attempts
            );
            if !last {
                tokio::time::sleep(retry_delay).await;
            }
        }

        false
    }

    /// Minimize with an overall deadline of `timeout`, giving up early if
    /// the program exits. Programs that start in the tray are reported as
    /// minimized without touching the window system.
    pub async fn minimize_persistently(
        &self,
        pid: u32,
        name: &str,
        starts_in_tray: bool,
        max_attempts: u32,
        retry_delay: Duration,
        timeout: Duration,
    ) -> bool {
        if starts_in_tray {
            debug!("'{}' starts in the tray, skipping minimization", name);
            return true;
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut remaining_attempts = max_attempts;

        while remaining_attempts > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }

            match self.control.probe(pid) {
                Ok(liveness) if liveness.is_alive() => {}
                Ok(_) => {
                    warn!("'{}' (PID {}) exited before it could be minimized", name, pid);
                    return false;
                }
                Err(e) => {
                    warn!("Error checking '{}' (PID {}): {:#}", name, pid, e);
                    return false;
                }
            }

            let round = remaining_attempts.min(ATTEMPTS_PER_ROUND);
            remaining_attempts -= round;

            match tokio::time::timeout(left, self.attempt(pid, name, round, retry_delay)).await {
                Ok(true) => return true,
                Ok(false) if remaining_attempts > 0 => {
                    attempt_log!(
                        "'{}' still not minimized, {} attempt(s) left",
                        name,
                        remaining_attempts
                    );
                    let left = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(retry_delay.min(left)).await;
                }
                Ok(false) => {}
                Err(_) => break,
            }
        }

        warn!(
            name,
            pid,
            "Giving up on minimizing '{}' after {:.1}s",
            name,
            started.elapsed().as_secs_f64()
        );
        false
    }

    fn all_minimized(&self, windows: &[WindowHandle], name: &str) -> bool {
        // Query every window even after a failure so each gets logged
        windows
            .iter()
            .map(|&window| match self.windows.is_minimized(window) {
                Ok(minimized) => minimized,
                Err(e) => {
                    debug!("Window {} of '{}' could not be queried: {:#}", window, name, e);
                    false
                }
            })
            .fold(true, |all, minimized| all && minimized)
    }
}
