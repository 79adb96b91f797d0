//! Process spawning, signalling and liveness probing

pub mod control;
pub mod launcher;

pub use control::{ChildProcess, Liveness, OsProcesses, ProcessControl, ProcessStatus};
pub use launcher::{LaunchError, ProcessLauncher};
