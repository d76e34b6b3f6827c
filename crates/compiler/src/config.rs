//! Build configuration
//!
//! Carries the CLI-facing knobs through the pipeline: tracing, compile-only
//! mode, the RNG seed, and where the standard library lives. The stdlib
//! directory comes from `$CASSETTE_STDLIB`; every `.ct` file in it joins
//! the project, though only imported modules are compiled.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Print disassembly and trace VM steps
    pub debug: bool,
    /// Write a `.tape` chunk instead of running
    pub compile_only: bool,
    /// Seed for the VM's random generator
    pub seed: u64,
    /// Directory of stdlib `.ct` sources
    pub stdlib: Option<PathBuf>,
}

impl BuildConfig {
    pub fn from_env() -> Self {
        BuildConfig {
            debug: false,
            compile_only: false,
            seed: time_seed(),
            stdlib: stdlib_from_env(),
        }
    }
}

pub fn stdlib_from_env() -> Option<PathBuf> {
    std::env::var_os("CASSETTE_STDLIB").map(PathBuf::from)
}

/// Time-derived seed for when `-s` is not given.
pub fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
