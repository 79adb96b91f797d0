//! Logging utilities

use crate::cli::options::{Command, Options};
use std::sync::OnceLock;

/// Global flag for verbose logging
static VERBOSE_LOGGING: OnceLock<bool> = OnceLock::new();

/// Check if verbose logging is enabled
pub fn is_verbose() -> bool {
    VERBOSE_LOGGING.get().copied().unwrap_or(false)
}

/// Initialize verbose logging flag from command-line options
pub fn init_verbose(opts: &Options) {
    VERBOSE_LOGGING.set(get_verbose_flag(opts)).ok();
}

/// Install the fmt subscriber. `RUST_LOG` takes precedence; otherwise INFO,
/// or DEBUG when verbose.
pub fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    } else {
        let level = if is_verbose() {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };
        tracing_subscriber::fmt().with_max_level(level).init();
    }
}

fn get_verbose_flag(opts: &Options) -> bool {
    match &opts.command {
        Command::Run(args) => args.common.verbose,
        Command::Check(args) => args.common.verbose,
    }
}
