use crate::supervisor::Supervisor;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

/// Build the multi-threaded runtime used by `run`
pub(crate) fn build_tokio_runtime() -> eyre::Result<tokio::runtime::Runtime> {
    let worker_threads = std::cmp::min(num_cpus::get(), 8);
    let max_blocking = worker_threads * 2;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .max_blocking_threads(max_blocking)
        .thread_name("companion_launch-worker")
        .enable_all()
        .build()?;
    debug!(
        "Tokio runtime created ({} worker threads, {} max blocking threads)",
        worker_threads, max_blocking
    );
    Ok(runtime)
}

/// Guard that terminates every supervised program on drop.
///
/// Covers early returns and panics in the run path; disabled once the
/// graceful shutdown has completed.
pub(crate) struct CleanupGuard {
    supervisor: Arc<Supervisor>,
    enabled: AtomicBool,
}

impl CleanupGuard {
    pub(crate) fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            enabled: AtomicBool::new(true),
        }
    }

    /// Disable the cleanup guard (call after graceful shutdown completes)
    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        debug!("CleanupGuard disabled - graceful shutdown completed");
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.enabled.load(Ordering::Relaxed) {
            debug!("CleanupGuard: Ensuring all started programs are terminated");
            self.supervisor.terminate_all();
        } else {
            debug!("CleanupGuard: Skipped (disabled after graceful shutdown)");
        }
    }
}

/// Run `terminate_all` off the async worker threads
pub(crate) async fn terminate_all_blocking(supervisor: Arc<Supervisor>) {
    if let Err(e) = tokio::task::spawn_blocking(move || supervisor.terminate_all()).await {
        tracing::error!("Termination task failed: {}", e);
    }
}
