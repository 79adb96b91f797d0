//! Program descriptions loaded from the configuration

use std::{path::PathBuf, time::Duration};

/// Default number of minimize attempts per helper
pub const DEFAULT_MAX_MINIMIZE_ATTEMPTS: u32 = 6;

/// Default delay between minimize attempts
pub const DEFAULT_MINIMIZE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default wall-clock budget for minimizing one helper
pub const DEFAULT_MINIMIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default wait between launching a helper and the first minimize attempt
pub const DEFAULT_INITIAL_MINIMIZE_DELAY: Duration = Duration::from_secs(2);

/// How hard to try minimizing a helper's windows after launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimizePolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub initial_delay: Duration,
}

impl Default for MinimizePolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_MINIMIZE_ATTEMPTS,
            retry_delay: DEFAULT_MINIMIZE_RETRY_DELAY,
            timeout: DEFAULT_MINIMIZE_TIMEOUT,
            initial_delay: DEFAULT_INITIAL_MINIMIZE_DELAY,
        }
    }
}

/// One configured program. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    pub executable_path: PathBuf,
    pub arguments: Vec<String>,
    pub is_main: bool,
    pub starts_in_tray: bool,
    pub minimize: MinimizePolicy,
}

impl ProgramSpec {
    /// Build a helper spec with default minimization policy
    pub fn new(name: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable_path: executable_path.into(),
            arguments: Vec::new(),
            is_main: false,
            starts_in_tray: false,
            minimize: MinimizePolicy::default(),
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn main(mut self) -> Self {
        self.is_main = true;
        self
    }

    pub fn in_tray(mut self) -> Self {
        self.starts_in_tray = true;
        self
    }

    pub fn with_minimize_policy(mut self, policy: MinimizePolicy) -> Self {
        self.minimize = policy;
        self
    }
}

/// Split a configured argument line into tokens
pub fn split_arguments(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
