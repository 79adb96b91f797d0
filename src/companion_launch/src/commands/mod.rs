//! Subcommand handlers

pub mod check;
pub mod common;
pub mod run;
pub mod signal_handler;

pub use check::handle_check;
pub use run::handle_run;
