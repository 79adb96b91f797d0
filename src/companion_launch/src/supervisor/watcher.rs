//! Main program liveness watcher
//!
//! One background task polls the main program's pid at a fixed interval.
//! When the program is found dead, the task runs the registered exit
//! callback once and finishes. `stop()` cancels the task through a watch
//! channel and waits for it with a bounded join, except when called from
//! inside the task itself (typically from the exit callback), where it only
//! signals.

use crate::process::control::ProcessControl;
use futures::{future::BoxFuture, FutureExt};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

tokio::task_local! {
    /// Session id of the watch task currently executing
    static WATCH_SESSION: u64;
}

/// Runs once when the watched program exits on its own
pub type ExitCallback = Box<dyn FnOnce() -> BoxFuture<'static, eyre::Result<()>> + Send>;

/// The program being watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub name: String,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Watching,
    /// The target exited and the exit callback ran
    Exited,
    /// Watching was cancelled by `stop()`
    Stopped,
}

struct Session {
    id: u64,
    stop_tx: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

struct WatcherState {
    phase: WatchPhase,
    session: Option<Session>,
}

pub struct LivenessWatcher {
    control: Arc<dyn ProcessControl>,
    poll_interval: Duration,
    join_timeout: Duration,
    next_session: AtomicU64,
    state: Arc<Mutex<WatcherState>>,
}

impl LivenessWatcher {
    pub fn new(
        control: Arc<dyn ProcessControl>,
        poll_interval: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            control,
            poll_interval,
            join_timeout,
            next_session: AtomicU64::new(1),
            state: Arc::new(Mutex::new(WatcherState {
                phase: WatchPhase::Idle,
                session: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, WatcherState> {
        lock_state(&self.state)
    }

    /// Start watching `target`. Does nothing if a watch is already active.
    pub fn start(&self, target: WatchTarget, on_exit: ExitCallback) -> eyre::Result<()> {
        if target.pid == 0 {
            eyre::bail!("Cannot watch '{}': invalid PID 0", target.name);
        }

        let mut state = self.state();
        if state.phase == WatchPhase::Watching {
            warn!(
                "Already watching a program, ignoring request to watch '{}' (PID {})",
                target.name, target.pid
            );
            return Ok(());
        }

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        info!(
            name = %target.name,
            pid = target.pid,
            "Watching main program '{}' (PID {})",
            target.name,
            target.pid
        );

        let poll = PollLoop {
            control: self.control.clone(),
            target,
            interval: self.poll_interval,
            stop_rx,
        };
        let task_state = self.state.clone();
        let task_stop_tx = stop_tx.clone();
        let task = tokio::spawn(WATCH_SESSION.scope(id, async move {
            let exited = poll.run().await;
            if exited && finish_session(&task_state, id) {
                run_callback(on_exit).await;
            }
            task_stop_tx.send_replace(true);
        }));

        state.phase = WatchPhase::Watching;
        state.session = Some(Session { id, stop_tx, task });
        Ok(())
    }

    /// Stop watching. Safe to call repeatedly and from the exit callback.
    pub async fn stop(&self) {
        let session = {
            let mut state = self.state();
            let Some(session) = state.session.take() else {
                return;
            };
            if state.phase == WatchPhase::Watching {
                state.phase = WatchPhase::Stopped;
            }
            session
        };

        session.stop_tx.send_replace(true);

        let inside_watch_task = WATCH_SESSION
            .try_with(|current| *current == session.id)
            .unwrap_or(false);
        if inside_watch_task {
            debug!("Stop requested from the watch task, not waiting for it");
            return;
        }

        match tokio::time::timeout(self.join_timeout, session.task).await {
            Ok(Ok(())) => debug!("Watch task stopped"),
            Ok(Err(e)) => warn!("Watch task ended abnormally: {}", e),
            Err(_) => warn!(
                "Watch task did not stop within {:?}, leaving it behind",
                self.join_timeout
            ),
        }
    }

    /// True while the poll task is running and has not been told to stop
    pub fn is_watching(&self) -> bool {
        let state = self.state();
        state.phase == WatchPhase::Watching
            && state
                .session
                .as_ref()
                .is_some_and(|s| !*s.stop_tx.borrow() && !s.task.is_finished())
    }

    pub fn phase(&self) -> WatchPhase {
        self.state().phase
    }
}

fn lock_state(state: &Mutex<WatcherState>) -> MutexGuard<'_, WatcherState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mark session `id` as exited. False if it was stopped in the meantime.
fn finish_session(state: &Mutex<WatcherState>, id: u64) -> bool {
    let mut state = lock_state(state);
    let current = state.session.as_ref().is_some_and(|s| s.id == id);
    if current && state.phase == WatchPhase::Watching {
        state.phase = WatchPhase::Exited;
        true
    } else {
        false
    }
}

async fn run_callback(on_exit: ExitCallback) {
    match AssertUnwindSafe(on_exit()).catch_unwind().await {
        Ok(Ok(())) => debug!("Exit callback finished"),
        Ok(Err(e)) => error!("Exit callback failed: {:#}", e),
        Err(_) => error!("Exit callback panicked"),
    }
}

struct PollLoop {
    control: Arc<dyn ProcessControl>,
    target: WatchTarget,
    interval: Duration,
    stop_rx: watch::Receiver<bool>,
}

impl PollLoop {
    /// Returns true when the target exited, false when stopped
    async fn run(mut self) -> bool {
        let WatchTarget { name, pid } = &self.target;

        loop {
            tokio::select! {
                biased;

                _ = self.stop_rx.changed() => {
                    debug!("Stopped watching '{}' (PID {})", name, pid);
                    return false;
                }

                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.control.probe(*pid) {
                Ok(liveness) if liveness.is_alive() => {}
                Ok(liveness) => {
                    info!(
                        name = %name,
                        pid = *pid,
                        "Main program '{}' (PID {}) has exited ({:?})",
                        name,
                        pid,
                        liveness
                    );
                    return true;
                }
                Err(e) => {
                    error!(
                        "Error checking main program '{}' (PID {}): {:#}. Treating it as exited.",
                        name, pid, e
                    );
                    return true;
                }
            }
        }
    }
}
