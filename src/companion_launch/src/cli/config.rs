//! Program list configuration
//!
//! The configuration is a JSON document:
//!
//! ```json
//! {
//!   "parallelism": 4,
//!   "poll_interval": 1.0,
//!   "programs": [
//!     { "name": "Overlay", "path": "/opt/overlay/overlay", "arguments": "--compact" },
//!     { "name": "Voice", "path": "/usr/bin/voice", "starts_in_tray": true },
//!     { "name": "Sim", "path": "/opt/sim/sim", "arguments": ["-fullscreen"], "is_main": true }
//!   ]
//! }
//! ```

use crate::program::{
    split_arguments, MinimizePolicy, ProgramSpec, DEFAULT_INITIAL_MINIMIZE_DELAY,
    DEFAULT_MAX_MINIMIZE_ATTEMPTS, DEFAULT_MINIMIZE_RETRY_DELAY, DEFAULT_MINIMIZE_TIMEOUT,
};
use serde::Deserialize;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

/// Default number of helpers started concurrently
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default interval between liveness checks of the main program
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'programs' list cannot be empty")]
    NoPrograms,

    #[error("program at index {index} has an empty '{field}'")]
    EmptyField { index: usize, field: &'static str },

    #[error("program name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("program '{0}': max_minimize_attempts must be at least 1")]
    ZeroAttempts(String),

    #[error("parallelism must be at least 1")]
    ZeroParallelism,

    #[error("'{field}' must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: String, value: f64 },

    #[error("'poll_interval' must be greater than zero")]
    ZeroPollInterval,
}

/// A configured argument list: one whitespace-separated string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Arguments {
    Line(String),
    List(Vec<String>),
}

impl Arguments {
    fn into_vec(self) -> Vec<String> {
        match self {
            Arguments::Line(line) => split_arguments(&line),
            Arguments::List(list) => list,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawProgram {
    name: String,
    path: String,
    #[serde(default)]
    arguments: Option<Arguments>,
    #[serde(default)]
    is_main: bool,
    #[serde(default)]
    starts_in_tray: bool,
    max_minimize_attempts: Option<u32>,
    minimize_retry_delay: Option<f64>,
    minimize_timeout: Option<f64>,
    initial_minimize_delay: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    parallelism: Option<usize>,
    poll_interval: Option<f64>,
    programs: Vec<RawProgram>,
}

/// A validated configuration
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Programs in file order. Exactly one is flagged main unless the file
    /// flagged several, in which case startup picks the first.
    pub programs: Vec<ProgramSpec>,
    pub parallelism: usize,
    pub poll_interval: Duration,
}

impl LoadedConfig {
    /// The program that startup will treat as main
    pub fn main_program(&self) -> Option<&ProgramSpec> {
        self.programs.iter().find(|p| p.is_main)
    }

    pub fn helpers(&self) -> impl Iterator<Item = &ProgramSpec> {
        let main = self.main_program().map(|p| p.name.as_str());
        self.programs
            .iter()
            .filter(move |p| Some(p.name.as_str()) != main)
    }
}

/// Read and validate the configuration at `path`
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    debug!("Loading configuration from {}", path.display());
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text).map_err(|e| match e {
        ParseFailure::Json(source) => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Invalid(e) => e,
    })
}

enum ParseFailure {
    Json(serde_json::Error),
    Invalid(ConfigError),
}

impl From<ConfigError> for ParseFailure {
    fn from(e: ConfigError) -> Self {
        ParseFailure::Invalid(e)
    }
}

fn parse_config(text: &str) -> Result<LoadedConfig, ParseFailure> {
    let raw: RawConfig = serde_json::from_str(text).map_err(ParseFailure::Json)?;

    if raw.programs.is_empty() {
        return Err(ConfigError::NoPrograms.into());
    }

    let parallelism = raw.parallelism.unwrap_or(DEFAULT_PARALLELISM);
    if parallelism == 0 {
        return Err(ConfigError::ZeroParallelism.into());
    }
    let poll_interval = seconds("poll_interval", raw.poll_interval, DEFAULT_POLL_INTERVAL)?;
    if poll_interval.is_zero() {
        return Err(ConfigError::ZeroPollInterval.into());
    }

    let mut names = HashSet::new();
    let mut programs = Vec::with_capacity(raw.programs.len());
    for (index, program) in raw.programs.into_iter().enumerate() {
        let spec = validate_program(index, program)?;
        if !names.insert(spec.name.clone()) {
            return Err(ConfigError::DuplicateName(spec.name).into());
        }
        programs.push(spec);
    }

    designate_main(&mut programs);

    Ok(LoadedConfig {
        programs,
        parallelism,
        poll_interval,
    })
}

fn validate_program(index: usize, raw: RawProgram) -> Result<ProgramSpec, ConfigError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigError::EmptyField {
            index,
            field: "name",
        });
    }
    if raw.path.trim().is_empty() {
        return Err(ConfigError::EmptyField {
            index,
            field: "path",
        });
    }

    let max_attempts = raw
        .max_minimize_attempts
        .unwrap_or(DEFAULT_MAX_MINIMIZE_ATTEMPTS);
    if max_attempts == 0 {
        return Err(ConfigError::ZeroAttempts(name));
    }

    let field = |key: &str| format!("{name}.{key}");
    let minimize = MinimizePolicy {
        max_attempts,
        retry_delay: seconds(
            &field("minimize_retry_delay"),
            raw.minimize_retry_delay,
            DEFAULT_MINIMIZE_RETRY_DELAY,
        )?,
        timeout: seconds(
            &field("minimize_timeout"),
            raw.minimize_timeout,
            DEFAULT_MINIMIZE_TIMEOUT,
        )?,
        initial_delay: seconds(
            &field("initial_minimize_delay"),
            raw.initial_minimize_delay,
            DEFAULT_INITIAL_MINIMIZE_DELAY,
        )?,
    };

    let path = PathBuf::from(&raw.path);
    if !path.exists() {
        warn!(
            "Program path does not exist: {} for '{}'",
            path.display(),
            name
        );
    }

    let mut spec = ProgramSpec::new(name, path)
        .with_arguments(raw.arguments.map(Arguments::into_vec).unwrap_or_default())
        .with_minimize_policy(minimize);
    spec.is_main = raw.is_main;
    spec.starts_in_tray = raw.starts_in_tray;
    Ok(spec)
}

/// Fall back to the last program when none is flagged main, and warn when
/// several are.
fn designate_main(programs: &mut [ProgramSpec]) {
    let flagged: Vec<&str> = programs
        .iter()
        .filter(|p| p.is_main)
        .map(|p| p.name.as_str())
        .collect();

    match flagged.as_slice() {
        [] => {
            if let Some(last) = programs.last_mut() {
                warn!(
                    "No main program flagged, using the last entry '{}' as main",
                    last.name
                );
                last.is_main = true;
            }
        }
        [_] => {}
        [first, ..] => {
            warn!(
                "Multiple main programs flagged ({}); '{}' is used as main",
                flagged.join(", "),
                first
            );
        }
    }
}

/// Convert a configured number of seconds, rejecting negative, non-finite
/// and out-of-range values
fn seconds(field: &str, value: Option<f64>, default: Duration) -> Result<Duration, ConfigError> {
    let Some(secs) = value else {
        return Ok(default);
    };
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: secs,
    })
}
