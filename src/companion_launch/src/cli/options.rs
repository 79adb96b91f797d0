use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Default location of the program list
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Launch a main application with companion programs and stop them when it exits
#[derive(Parser)]
#[command(name = "companion_launch")]
#[command(version)]
#[command(about = "Launch a main application with companion programs and stop them when it exits")]
#[command(after_help = "Examples:\n  \
    companion_launch run\n  \
    companion_launch run --config ~/sim/companions.json --parallelism 2\n  \
    companion_launch check --config ~/sim/companions.json")]
#[command(arg_required_else_help = true)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start every configured program and supervise until the main one exits
    #[command(after_help = "Examples:\n  \
        companion_launch run\n  \
        companion_launch run --verbose --poll-interval 0.5")]
    Run(RunArgs),

    /// Validate the configuration and print the startup plan
    Check(CheckArgs),
}

/// Arguments for supervising a run
#[derive(Args)]
pub struct RunArgs {
    /// Maximum number of helper programs started at the same time.
    /// Overrides `parallelism` from the configuration file.
    #[arg(long, short = 'j', value_name = "N")]
    pub parallelism: Option<usize>,

    /// Seconds between liveness checks of the main program.
    /// Overrides `poll_interval` from the configuration file.
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<f64>,

    /// Skip the second minimization pass after startup
    #[arg(long)]
    pub no_retry_minimize: bool,

    #[command(flatten)]
    pub common: CommonOptions,
}

/// Arguments for validating a configuration
#[derive(Args)]
pub struct CheckArgs {
    #[command(flatten)]
    pub common: CommonOptions,
}

/// Common options shared across all commands
#[derive(Args, Clone)]
pub struct CommonOptions {
    /// Program list (JSON)
    #[arg(long, short = 'c', value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log every minimize attempt and debug detail
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            verbose: false,
        }
    }
}
