//! Pool configuration.
//!
//! # Environment Variables
//!
//! - `SPAWNPOOL_PROGRAM` - Executable to launch as worker (default: current executable)

use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable marking a process as a worker. Its value is the
/// JSON channel manifest.
pub const DEFAULT_WORKER_ENV: &str = "SPAWNPOOL_WORKER";

/// Configuration shared by the dispatcher and its workers.
///
/// Immutable once handed to [`crate::Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Executable re-launched for every worker (None = current executable).
    pub program: Option<PathBuf>,
    /// Arguments for workers (None = the dispatcher's own arguments).
    pub args: Option<Vec<OsString>>,
    /// Name of the role-marker environment variable.
    pub worker_env: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: None,
            worker_env: DEFAULT_WORKER_ENV.to_string(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch workers from a specific executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Launch workers with explicit arguments instead of the dispatcher's own.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Use a different role-marker variable (lets nested pools coexist).
    pub fn with_worker_env(mut self, name: impl Into<String>) -> Self {
        self.worker_env = name.into();
        self
    }

    /// Apply environment variable overrides.
    ///
    /// `SPAWNPOOL_PROGRAM` sets the program only if none was configured.
    pub fn with_env_overrides(mut self) -> Self {
        if self.program.is_none()
            && let Some(program) = std::env::var_os("SPAWNPOOL_PROGRAM")
        {
            self.program = Some(PathBuf::from(program));
        }
        self
    }

    /// Executable to launch for workers.
    pub(crate) fn worker_program(&self) -> std::io::Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe(),
        }
    }

    /// Arguments to launch workers with, excluding the program name.
    pub(crate) fn worker_args(&self) -> Vec<OsString> {
        match &self.args {
            Some(args) => args.clone(),
            None => std::env::args_os().skip(1).collect(),
        }
    }
}
