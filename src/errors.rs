//! Host-facing error types
//!
//! Language-level exceptions are values (see `interpreter::errors`). The types
//! here cover what script code cannot catch: precondition violations against
//! the scheduler and fatal failures that end the whole run.

use thiserror::Error;

use crate::scheduler::JobId;

/// Precondition violations reported by the scheduler (never retried)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("job {0} is already terminated")]
    JobTerminated(JobId),

    #[error("no job with id {0}")]
    UnknownJob(JobId),

    #[error("no tag named '{0}'")]
    UnknownTag(String),

    #[error("invalid syntax tree: {0}")]
    InvalidAst(String),
}

/// Failures that cannot be unwound cooperatively
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error("stack exhausted in job {job} ({depth} frames)")]
    StackExhausted { job: JobId, depth: usize },

    #[error("exception raised while unwinding a stop in job {job}: {message}")]
    UnwindFailed { job: JobId, message: String },
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
