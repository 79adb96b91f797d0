use crate::{
    cli::{
        config::{load_config, LoadedConfig},
        options::CheckArgs,
    },
    program::ProgramSpec,
};
use tracing::{error, info, warn};

/// Handle the 'check' subcommand
pub fn handle_check(args: &CheckArgs) -> eyre::Result<()> {
    let config = load_config(&args.common.config).map_err(|e| {
        error!("{}", e);
        e
    })?;

    info!("Configuration {} is valid", args.common.config.display());
    for line in startup_plan(&config) {
        info!("{}", line);
    }

    let missing: Vec<&str> = config
        .programs
        .iter()
        .filter(|p| !p.executable_path.exists())
        .map(|p| p.name.as_str())
        .collect();
    if !missing.is_empty() {
        warn!("Programs with missing executables: {}", missing.join(", "));
    }

    Ok(())
}

/// Human-readable startup plan, one line per entry
fn startup_plan(config: &LoadedConfig) -> Vec<String> {
    let mut lines = vec![format!(
        "Helpers start up to {} at a time; the main program is polled every {:.1}s",
        config.parallelism,
        config.poll_interval.as_secs_f64()
    )];

    if let Some(main) = config.main_program() {
        lines.push(format!("main:   {}", describe(main)));
    }
    lines.extend(config.helpers().map(|helper| {
        let minimize = if helper.starts_in_tray {
            "starts in tray".to_string()
        } else {
            let policy = &helper.minimize;
            format!(
                "minimize after {:.1}s, {} attempt(s) {:.1}s apart, give up after {:.1}s",
                policy.initial_delay.as_secs_f64(),
                policy.max_attempts,
                policy.retry_delay.as_secs_f64(),
                policy.timeout.as_secs_f64()
            )
        };
        format!("helper: {} ({})", describe(helper), minimize)
    }));
    lines
}

fn describe(spec: &ProgramSpec) -> String {
    if spec.arguments.is_empty() {
        format!("{} -> {}", spec.name, spec.executable_path.display())
    } else {
        format!(
            "{} -> {} {}",
            spec.name,
            spec.executable_path.display(),
            spec.arguments.join(" ")
        )
    }
}
