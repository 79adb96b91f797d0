//! Supervision engine
//!
//! [`Supervisor`] owns every process it launched. Startup workers, the
//! liveness watcher's exit callback and the signal path all share one
//! `Arc<Supervisor>`; the live-process map and the termination record sit
//! behind a single mutex so no two paths can terminate the same program.
//!
//! # Layout
//! - `startup`: main-first launch sequencing and bounded helper startup
//! - `minimize`: window minimization retry policy
//! - `watcher`: main program liveness polling
//! - `termination`: idempotent graceful-then-forceful teardown

pub mod minimize;
pub mod startup;
pub mod termination;
pub mod watcher;

pub use minimize::MinimizationRetrier;
pub use startup::{HelperOutcome, HelperResult, StartupReport};
pub use watcher::{ExitCallback, LivenessWatcher, WatchPhase, WatchTarget};

use crate::{
    process::{
        control::{ChildProcess, ProcessControl, ProcessStatus},
        launcher::{ProcessLauncher, DEFAULT_MAIN_SETTLE},
    },
    program::ProgramSpec,
    window::WindowLocator,
};
use chrono::{DateTime, Local};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Attempts used by the second minimization pass
const RETRY_PASS_ATTEMPTS: u32 = 8;

/// Delay between attempts of the second minimization pass
const RETRY_PASS_DELAY: Duration = Duration::from_millis(1500);

/// Fixed delays and intervals used by the engine
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Wait before checking the main program survived launch
    pub main_settle: Duration,
    /// Wait between a minimize request and the placement check
    pub minimize_settle: Duration,
    /// Liveness poll interval for the main program
    pub poll_interval: Duration,
    /// Upper bound on waiting for the poll task in `stop_watching`
    pub stop_join_timeout: Duration,
    /// Time a program gets to exit after SIGTERM before SIGKILL
    pub termination_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            main_settle: DEFAULT_MAIN_SETTLE,
            minimize_settle: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
            stop_join_timeout: Duration::from_secs(2),
            termination_grace: Duration::from_millis(500),
        }
    }
}

/// A program the supervisor launched and still owns
pub struct TrackedProcess {
    pub name: String,
    pub pid: u32,
    pub spec: ProgramSpec,
    pub was_minimized: bool,
    pub started_at: DateTime<Local>,
    child: Box<dyn ChildProcess>,
}

impl TrackedProcess {
    pub fn new(spec: ProgramSpec, child: Box<dyn ChildProcess>) -> Self {
        Self {
            name: spec.name.clone(),
            pid: child.pid(),
            spec,
            was_minimized: false,
            started_at: Local::now(),
            child,
        }
    }

    fn has_exited(&mut self) -> bool {
        match self.child.poll() {
            Ok(ProcessStatus::Running) => false,
            Ok(ProcessStatus::Exited { .. }) => true,
            Err(e) => {
                debug!("Status check for '{}' (PID {}) failed: {}", self.name, self.pid, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for TrackedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("was_minimized", &self.was_minimized)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// State guarded by the supervisor's single lock
#[derive(Default)]
struct Registry {
    tracked: HashMap<String, TrackedProcess>,
    /// Names already terminated (or being terminated) in this run
    terminated: HashSet<String>,
    /// Helpers still waiting for a successful minimize, by pid
    unminimized: HashMap<String, u32>,
    main: Option<WatchTarget>,
    /// Cleared once `terminate_all` starts; late launches are refused
    closed: bool,
}

pub struct Supervisor {
    control: Arc<dyn ProcessControl>,
    launcher: ProcessLauncher,
    retrier: MinimizationRetrier,
    watcher: LivenessWatcher,
    registry: Mutex<Registry>,
    timings: Timings,
}

impl Supervisor {
    pub fn new(
        control: Arc<dyn ProcessControl>,
        windows: Arc<dyn WindowLocator>,
        timings: Timings,
    ) -> Arc<Self> {
        Arc::new(Self {
            launcher: ProcessLauncher::new(control.clone(), timings.main_settle),
            retrier: MinimizationRetrier::new(windows, control.clone(), timings.minimize_settle),
            watcher: LivenessWatcher::new(
                control.clone(),
                timings.poll_interval,
                timings.stop_join_timeout,
            ),
            control,
            registry: Mutex::new(Registry::default()),
            timings,
        })
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn retrier(&self) -> &MinimizationRetrier {
        &self.retrier
    }

    pub fn watcher(&self) -> &LivenessWatcher {
        &self.watcher
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock leaves the maps consistent enough
        // to keep tearing processes down
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take ownership of a launched process. Hands the process back if the
    /// supervisor is already shutting down.
    pub(crate) fn register(&self, tracked: TrackedProcess) -> Result<(), TrackedProcess> {
        let mut registry = self.registry();
        if registry.closed {
            return Err(tracked);
        }

        let stale: Vec<String> = registry
            .tracked
            .values()
            .filter(|existing| existing.pid == tracked.pid)
            .map(|existing| existing.name.clone())
            .collect();
        for name in stale {
            debug!("Dropping stale entry '{}' that held PID {}", name, tracked.pid);
            registry.tracked.remove(&name);
            registry.unminimized.remove(&name);
        }

        if tracked.spec.is_main {
            registry.main = Some(WatchTarget {
                name: tracked.name.clone(),
                pid: tracked.pid,
            });
        }
        registry.tracked.insert(tracked.name.clone(), tracked);
        Ok(())
    }

    fn record_minimize_result(&self, name: &str, pid: u32, minimized: bool) {
        let mut registry = self.registry();
        if let Some(tracked) = registry.tracked.get_mut(name) {
            tracked.was_minimized = minimized;
        }
        if minimized {
            registry.unminimized.remove(name);
        } else {
            registry.unminimized.insert(name.to_string(), pid);
        }
    }

    /// The main program's watch target, if it was started
    pub fn main_target(&self) -> Option<WatchTarget> {
        self.registry().main.clone()
    }

    /// Start polling the main program; `on_exit` runs once when it exits
    pub fn watch_main(&self, on_exit: ExitCallback) -> eyre::Result<()> {
        let target = self
            .main_target()
            .ok_or_else(|| eyre::eyre!("No main program is running to watch"))?;
        self.watcher.start(target, on_exit)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_watching()
    }

    pub async fn stop_watching(&self) {
        self.watcher.stop().await;
    }

    pub fn is_program_running(&self, name: &str) -> bool {
        self.registry()
            .tracked
            .get_mut(name)
            .is_some_and(|tracked| !tracked.has_exited())
    }

    /// Names of tracked programs that are still running. Programs found
    /// to have exited are dropped from tracking.
    pub fn running_program_names(&self) -> Vec<String> {
        let mut registry = self.registry();
        let exited: Vec<String> = registry
            .tracked
            .values_mut()
            .filter_map(|tracked| tracked.has_exited().then(|| tracked.name.clone()))
            .collect();
        for name in &exited {
            info!("Program '{}' is no longer running", name);
            registry.tracked.remove(name);
            registry.unminimized.remove(name);
        }

        let mut names: Vec<String> = registry.tracked.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of helpers whose windows are not minimized yet
    pub fn pending_minimize(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().unminimized.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tracked_pid(&self, name: &str) -> Option<u32> {
        self.registry().tracked.get(name).map(|t| t.pid)
    }

    pub fn was_minimized(&self, name: &str) -> Option<bool> {
        self.registry().tracked.get(name).map(|t| t.was_minimized)
    }

    /// Second minimization pass over helpers that were not minimized
    /// during startup
    pub async fn retry_minimize_all(&self) {
        let pending: Vec<(String, u32)> = self
            .registry()
            .unminimized
            .iter()
            .map(|(name, pid)| (name.clone(), *pid))
            .collect();
        if pending.is_empty() {
            debug!("No programs pending retry minimization");
            return;
        }

        info!("Retrying minimization for {} program(s)...", pending.len());
        for (name, pid) in pending {
            match self.control.probe(pid) {
                Ok(liveness) if liveness.is_alive() => {}
                Ok(_) => {
                    info!("Skipping retry for '{}' (PID {}): process no longer exists", name, pid);
                    self.registry().unminimized.remove(&name);
                    continue;
                }
                Err(e) => {
                    warn!("Error checking '{}' (PID {}): {:#}. Skipping retry.", name, pid, e);
                    self.registry().unminimized.remove(&name);
                    continue;
                }
            }

            let minimized = self
                .retrier
                .minimize(pid, &name, RETRY_PASS_ATTEMPTS, RETRY_PASS_DELAY)
                .await;
            if minimized {
                self.record_minimize_result(&name, pid, true);
            } else {
                warn!("Retry minimization failed for '{}' (PID {})", name, pid);
            }
        }

        let remaining = self.pending_minimize();
        if remaining.is_empty() {
            info!("Retry minimization round completed");
        } else {
            warn!(
                "{} program(s) remain unminimized after retry: {:?}",
                remaining.len(),
                remaining
            );
        }
    }

    /// Forget everything and accept new launches again
    pub async fn reset(&self) {
        self.watcher.stop().await;
        let mut registry = self.registry();
        *registry = Registry::default();
        debug!("Supervisor state reset");
    }

    pub(crate) fn launcher(&self) -> &ProcessLauncher {
        &self.launcher
    }

    /// Start the main program, then the helpers. See [`startup`].
    pub async fn start_all(
        self: &Arc<Self>,
        specs: &[ProgramSpec],
        parallelism: usize,
    ) -> Result<StartupReport, crate::process::launcher::LaunchError> {
        startup::start_all(self, specs, parallelism).await
    }
}
