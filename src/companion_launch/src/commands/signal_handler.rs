//! Blocking the run until the main program exits or the operator interrupts

use eyre::WrapErr;
use futures::stream::{BoxStream, StreamExt};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};
use tracing::{debug, info};

/// Why the run is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    MainExited,
    Interrupted,
}

/// SIGINT and SIGTERM fused into one stream.
///
/// Installing replaces the default disposition, so the process is no longer
/// killed outright by an interrupt. Install before any program is started.
pub(crate) struct TerminationSignals {
    stream: BoxStream<'static, &'static str>,
}

impl TerminationSignals {
    pub(crate) fn install() -> eyre::Result<Self> {
        let mut sigint =
            signal(SignalKind::interrupt()).wrap_err("Failed to register SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;

        // Fuse SIGINT and SIGTERM streams into a unified termination signal stream
        let sigint_stream = async_stream::stream! {
            while let Some(()) = sigint.recv().await {
                yield "SIGINT";
            }
        };
        let sigterm_stream = async_stream::stream! {
            while let Some(()) = sigterm.recv().await {
                yield "SIGTERM";
            }
        };
        let stream = futures::stream::select(sigint_stream, sigterm_stream).boxed();
        debug!("SIGINT/SIGTERM handlers installed");
        Ok(Self { stream })
    }

    /// Name of the next received signal. `None` once both streams closed.
    pub(crate) async fn recv(&mut self) -> Option<&'static str> {
        self.stream.next().await
    }
}

/// Wait until `main_exited` flips to true or SIGINT/SIGTERM arrives
pub(crate) async fn wait_for_shutdown(
    signals: &mut TerminationSignals,
    mut main_exited: watch::Receiver<bool>,
) -> ShutdownReason {
    tokio::select! {
        biased;

        Some(name) = signals.recv() => {
            info!("Received {}, shutting down...", name);
            ShutdownReason::Interrupted
        }

        _ = async {
            while !*main_exited.borrow_and_update() {
                if main_exited.changed().await.is_err() {
                    debug!("Main exit notifier dropped");
                    break;
                }
            }
        } => {
            ShutdownReason::MainExited
        }
    }
}
