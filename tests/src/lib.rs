//! Shared helpers for tests that run the supervisor against real processes

pub mod fixtures;
pub mod process;
