//! Supervise a main application together with its companion programs.
//!
//! Companions are started after the main application, their windows are
//! minimized, and they are torn down once the main application exits.

pub mod cli;
pub mod commands;
pub mod process;
pub mod program;
pub mod supervisor;
pub mod util;
pub mod window;

#[cfg(test)]
mod testing;

pub use process::{LaunchError, OsProcesses};
pub use program::{MinimizePolicy, ProgramSpec};
pub use supervisor::{StartupReport, Supervisor, Timings};
pub use window::{detect_window_backend, NoWindows, WindowLocator};
