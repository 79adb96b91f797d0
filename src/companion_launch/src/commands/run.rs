use super::{
    common::{build_tokio_runtime, terminate_all_blocking, CleanupGuard},
    signal_handler::{wait_for_shutdown, ShutdownReason, TerminationSignals},
};
use crate::{
    cli::{
        config::{load_config, LoadedConfig},
        options::RunArgs,
    },
    process::control::OsProcesses,
    supervisor::{ExitCallback, Supervisor, Timings},
    window::detect_window_backend,
};
use eyre::{bail, WrapErr};
use futures::FutureExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::info;

/// Handle the 'run' subcommand
pub fn handle_run(args: &RunArgs) -> eyre::Result<()> {
    let mut config = load_config(&args.common.config).map_err(|e| {
        tracing::error!("{}", e);
        e
    })?;

    if let Some(parallelism) = args.parallelism {
        if parallelism == 0 {
            bail!("--parallelism must be at least 1");
        }
        config.parallelism = parallelism;
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval = match Duration::try_from_secs_f64(secs) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => bail!("--poll-interval must be a positive number of seconds (got {secs})"),
        };
    }

    let runtime = build_tokio_runtime()?;
    runtime.block_on(run_programs(config, !args.no_retry_minimize))
}

async fn run_programs(config: LoadedConfig, retry_minimize: bool) -> eyre::Result<()> {
    // Before anything is spawned: an interrupt during startup must still
    // reach terminate_all
    let mut signals = TerminationSignals::install()?;

    let timings = Timings {
        poll_interval: config.poll_interval,
        ..Timings::default()
    };
    let supervisor = Supervisor::new(
        Arc::new(OsProcesses::new()),
        detect_window_backend(),
        timings,
    );
    let cleanup_guard = CleanupGuard::new(supervisor.clone());

    let startup = async {
        let report = supervisor
            .start_all(&config.programs, config.parallelism)
            .await
            .wrap_err("Startup aborted")?;
        if report.main.is_none() {
            bail!("The main program was not started");
        }
        if retry_minimize {
            supervisor.retry_minimize_all().await;
        }
        eyre::Ok(())
    };

    let interrupted = tokio::select! {
        biased;

        Some(name) = signals.recv() => {
            info!("Received {} during startup, shutting down...", name);
            true
        }

        result = startup => {
            result?;
            false
        }
    };

    let reason = if interrupted {
        ShutdownReason::Interrupted
    } else {
        let (exited_tx, exited_rx) = watch::channel(false);
        let on_exit: ExitCallback = {
            let supervisor = supervisor.clone();
            Box::new(move || {
                async move {
                    info!("Main program closed, terminating helper programs...");
                    terminate_all_blocking(supervisor).await;
                    exited_tx.send_replace(true);
                    eyre::Ok(())
                }
                .boxed()
            })
        };
        supervisor
            .watch_main(on_exit)
            .wrap_err("Failed to watch the main program")?;

        let running = supervisor.running_program_names();
        info!(
            "Supervising {} program(s): {}",
            running.len(),
            running.join(", ")
        );
        info!("Press Ctrl-C to stop all programs");

        let reason = wait_for_shutdown(&mut signals, exited_rx).await;
        supervisor.stop_watching().await;
        reason
    };

    terminate_all_blocking(supervisor.clone()).await;

    match reason {
        ShutdownReason::MainExited => info!("Main program exited, shutdown complete"),
        ShutdownReason::Interrupted => info!("Interrupted, shutdown complete"),
    }

    // Disable CleanupGuard after graceful shutdown completes
    cleanup_guard.disable();
    Ok(())
}
