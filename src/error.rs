//! Crate-wide error types.
//!
//! Per-file failures during loading and reloading are logged and contained at
//! the file boundary rather than propagated; the variants here cover the
//! cases a caller can meaningfully react to.

use std::path::PathBuf;

use crate::script::interp::ScriptError;
use crate::script::CompileError;

/// Type alias for results produced by the reload runtime
pub type ReloadResult<T> = Result<T, ReloadError>;

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("compile error in {}: {source}", path.display())]
    Compile {
        path: PathBuf,
        source: CompileError,
    },

    #[error("execution error in {}: {source}", path.display())]
    Execution {
        path: PathBuf,
        source: ScriptError,
    },

    #[error("namespace conflict at '{path}': {message}")]
    NamespaceConflict { path: String, message: String },

    #[error("dependency resolution failed after {passes} passes, {failures} script file(s) still failing")]
    DependencyResolution { passes: u32, failures: usize },

    #[error("invalid config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl ReloadError {
    /// True when the failure is a script-side import that may resolve once
    /// more files have loaded, so the unit is worth retrying.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ReloadError::Execution { source, .. } => source.is_import_failure(),
            _ => false,
        }
    }
}
