//! Engine-wide error kinds.
//!
//! Mirrors the error taxonomy of spec Section 7: Config, Resolution,
//! Filesystem, Execution, Async-failure, Analyzer, VersionMismatch.

use thiserror::Error;

/// Top-level engine error. Each variant corresponds to one error kind
/// from spec Section 7; propagation rules live with the callers (the
/// scheduler decides whether a `Resolution`/`Execution` error fails
/// just the workpackage or the whole run).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("filesystem error for {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with status {code}: {stderr_tail}")]
    Execution { code: i32, stderr_tail: String },

    #[error("async completion signaled failure via {0}")]
    AsyncFailure(String),

    #[error("analyzer error: {0}")]
    Analyzer(String),

    #[error(
        "benchmark was created by engine version {found}, this binary is version {expected}"
    )]
    VersionMismatch { found: String, expected: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
