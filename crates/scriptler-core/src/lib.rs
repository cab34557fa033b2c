//! `scriptler-core`: configuration and shared types used by the scheduler,
//! the executor and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::ScriptlerConfig;
pub use error::{Result, ScriptlerError};
pub use types::{ExecutionMode, ExecutionRecord, Language, RecordStatus, ScriptIdentity};
