//! Starting one configured program

use super::control::{ChildProcess, ProcessControl, ProcessStatus, SpawnRequest};
use crate::program::ProgramSpec;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Default wait before checking that the main program survived its launch
pub const DEFAULT_MAIN_SETTLE: Duration = Duration::from_secs(1);

/// Why a program could not be started
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("could not start '{name}': path does not exist: {}", .path.display())]
    MissingExecutable { name: String, path: PathBuf },

    #[error("could not start '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{name}' exited immediately after launch (exit code: {})", display_code(.code))]
    DiedOnLaunch { name: String, code: Option<i32> },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none, killed by signal".to_string(), |c| c.to_string())
}

/// A freshly started program
pub struct Launched {
    pub pid: u32,
    pub child: Box<dyn ChildProcess>,
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched").field("pid", &self.pid).finish()
    }
}

/// Kills a freshly started main program unless it passes the launch check,
/// including when the launch future is dropped during the settle delay
struct PendingLaunch {
    child: Option<Box<dyn ChildProcess>>,
}

impl PendingLaunch {
    fn child(&mut self) -> Option<&mut Box<dyn ChildProcess>> {
        self.child.as_mut()
    }

    fn release(mut self) -> Option<Box<dyn ChildProcess>> {
        self.child.take()
    }
}

impl Drop for PendingLaunch {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("Killing unconfirmed main program (PID {})", child.pid());
            if let Err(e) = child.kill() {
                warn!("Failed to kill PID {}: {}", child.pid(), e);
            }
            let _ = child.poll();
        }
    }
}

/// Starts external programs with their output discarded
#[derive(Clone)]
pub struct ProcessLauncher {
    control: Arc<dyn ProcessControl>,
    main_settle: Duration,
}

impl ProcessLauncher {
    pub fn new(control: Arc<dyn ProcessControl>, main_settle: Duration) -> Self {
        Self {
            control,
            main_settle,
        }
    }

    /// Launch `spec`. The main program is additionally checked for an
    /// immediate crash after a short settle delay.
    pub async fn launch(&self, spec: &ProgramSpec) -> Result<Launched, LaunchError> {
        if !spec.executable_path.exists() {
            return Err(LaunchError::MissingExecutable {
                name: spec.name.clone(),
                path: spec.executable_path.clone(),
            });
        }

        info!("Starting program: {}", spec.name);
        debug!(
            "Command for '{}': {} {:?}",
            spec.name,
            spec.executable_path.display(),
            spec.arguments
        );

        let child = self
            .control
            .spawn(&SpawnRequest {
                program: &spec.executable_path,
                args: &spec.arguments,
                detached: !spec.is_main,
            })
            .map_err(|source| LaunchError::Spawn {
                name: spec.name.clone(),
                source,
            })?;
        let pid = child.pid();

        let child = if spec.is_main {
            self.confirm_main(spec, child).await?
        } else {
            child
        };

        info!("Program '{}' started (PID: {})", spec.name, pid);
        Ok(Launched { pid, child })
    }

    async fn confirm_main(
        &self,
        spec: &ProgramSpec,
        child: Box<dyn ChildProcess>,
    ) -> Result<Box<dyn ChildProcess>, LaunchError> {
        let pid = child.pid();
        let mut pending = PendingLaunch { child: Some(child) };
        tokio::time::sleep(self.main_settle).await;

        let status = match pending.child() {
            Some(child) => child.poll(),
            None => Ok(ProcessStatus::Exited { code: None }),
        };
        match status {
            Ok(ProcessStatus::Running) => pending.release().ok_or_else(|| LaunchError::Spawn {
                name: spec.name.clone(),
                source: std::io::Error::other(format!("lost handle of PID {pid}")),
            }),
            Ok(ProcessStatus::Exited { code }) => Err(LaunchError::DiedOnLaunch {
                name: spec.name.clone(),
                code,
            }),
            Err(source) => Err(LaunchError::Spawn {
                name: spec.name.clone(),
                source,
            }),
        }
    }
}
