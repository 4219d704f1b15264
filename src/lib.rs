pub mod cli;
pub mod config;
pub mod errors;
pub mod host;
pub mod init;
pub mod interpreter;
pub mod scheduler;
pub mod sync;
pub mod tag;

pub use config::{ClockMode, Config, SchedulerConfig};
pub use errors::{ConfigError, FatalError, SchedulerError};
pub use host::{Host, HostHandle, HostOptions};
pub use interpreter::{parse_program, Ast, Val};
pub use scheduler::{CycleOutcome, JobHandle, JobId, JobOutcome, JobStatus, Scheduler};
pub use tag::{Tag, TagRef};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
