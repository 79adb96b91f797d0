//! Startup sequencing: the main program first, then helpers in parallel

use super::{Supervisor, TrackedProcess};
use crate::{process::launcher::LaunchError, program::ProgramSpec};
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, warn};

/// What happened to one helper during startup
#[derive(Debug)]
pub enum HelperResult {
    Started { minimized: bool },
    Failed(LaunchError),
}

#[derive(Debug)]
pub struct HelperOutcome {
    pub name: String,
    pub result: HelperResult,
}

impl HelperOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self.result, HelperResult::Started { .. })
    }
}

/// Summary of a `start_all` run
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Name of the main program, if one was configured
    pub main: Option<String>,
    /// Helper outcomes in completion order
    pub helpers: Vec<HelperOutcome>,
}

impl StartupReport {
    pub fn started_helpers(&self) -> usize {
        self.helpers.iter().filter(|h| h.is_started()).count()
    }

    pub fn failed_helpers(&self) -> impl Iterator<Item = &HelperOutcome> {
        self.helpers.iter().filter(|h| !h.is_started())
    }

    pub fn unminimized_helpers(&self) -> impl Iterator<Item = &HelperOutcome> {
        self.helpers
            .iter()
            .filter(|h| matches!(h.result, HelperResult::Started { minimized: false }))
    }
}

/// Split `specs` into the main program and helpers. The first program
/// flagged main wins; any other flagged program runs as a helper.
fn partition(specs: &[ProgramSpec]) -> (Option<&ProgramSpec>, Vec<ProgramSpec>) {
    let main_index = specs.iter().position(|spec| spec.is_main);
    let main = main_index.map(|i| &specs[i]);

    let helpers = specs
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != main_index)
        .map(|(_, spec)| {
            if spec.is_main {
                warn!(
                    "Multiple programs flagged as main; using '{}', starting '{}' as a helper",
                    main.map_or("", |m| m.name.as_str()),
                    spec.name
                );
                let mut helper = spec.clone();
                helper.is_main = false;
                helper
            } else {
                spec.clone()
            }
        })
        .collect();

    (main, helpers)
}

/// Launch the main program, then every helper with at most `parallelism`
/// launches in flight. Fails only when the main program cannot be started,
/// in which case no helper is started.
pub(super) async fn start_all(
    sup: &Arc<Supervisor>,
    specs: &[ProgramSpec],
    parallelism: usize,
) -> Result<StartupReport, LaunchError> {
    let (main, helpers) = partition(specs);
    let mut report = StartupReport::default();

    if let Some(main) = main {
        info!("Starting main program '{}'", main.name);
        let launched = sup.launcher().launch(main).await.map_err(|e| {
            error!("Failed to start main program: {}", e);
            e
        })?;

        if let Err(refused) = sup.register(TrackedProcess::new(main.clone(), launched.child)) {
            sup.discard(refused);
        } else {
            report.main = Some(main.name.clone());
        }
    } else {
        warn!("No main program configured, starting helpers only");
    }

    if helpers.is_empty() {
        return Ok(report);
    }

    let parallelism = parallelism.max(1);
    info!(
        "Starting {} helper program(s), up to {} at a time",
        helpers.len(),
        parallelism
    );

    let permits = Arc::new(Semaphore::new(parallelism));
    let mut workers = JoinSet::new();
    for spec in helpers {
        let sup = sup.clone();
        let permits = permits.clone();
        workers.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            let result = start_helper(&sup, &spec).await;
            HelperOutcome {
                name: spec.name,
                result,
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(outcome) => {
                if let HelperResult::Failed(e) = &outcome.result {
                    error!("{}", e);
                }
                report.helpers.push(outcome);
            }
            Err(e) => error!("Helper startup task failed: {}", e),
        }
    }

    let failed = report.failed_helpers().count();
    if failed == 0 {
        info!("All {} helper program(s) started", report.started_helpers());
    } else {
        warn!(
            "{} of {} helper program(s) failed to start",
            failed,
            report.helpers.len()
        );
    }

    Ok(report)
}

async fn start_helper(sup: &Supervisor, spec: &ProgramSpec) -> HelperResult {
    let launched = match sup.launcher().launch(spec).await {
        Ok(launched) => launched,
        Err(e) => return HelperResult::Failed(e),
    };
    let pid = launched.pid;

    if let Err(refused) = sup.register(TrackedProcess::new(spec.clone(), launched.child)) {
        sup.discard(refused);
        return HelperResult::Started { minimized: false };
    }

    if spec.starts_in_tray {
        sup.record_minimize_result(&spec.name, pid, true);
        return HelperResult::Started { minimized: true };
    }

    tokio::time::sleep(spec.minimize.initial_delay).await;

    let policy = spec.minimize;
    let minimized = sup
        .retrier()
        .minimize_persistently(
            pid,
            &spec.name,
            spec.starts_in_tray,
            policy.max_attempts,
            policy.retry_delay,
            policy.timeout,
        )
        .await;
    sup.record_minimize_result(&spec.name, pid, minimized);

    HelperResult::Started { minimized }
}
