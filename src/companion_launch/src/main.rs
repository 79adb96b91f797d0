use clap::Parser;
use companion_launch::{
    cli::options::{Command, Options},
    commands::{handle_check, handle_run},
    util::logging::{init_tracing, init_verbose},
};

fn main() -> eyre::Result<()> {
    // Parse command-line options first (before initializing tracing)
    let opts = Options::parse();

    init_verbose(&opts);
    init_tracing();

    match &opts.command {
        Command::Run(args) => handle_run(args),
        Command::Check(args) => handle_check(args),
    }
}
