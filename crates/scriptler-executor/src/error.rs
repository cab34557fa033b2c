//! Error types for the scriptler-executor crate.

use scriptler_core::{ScriptIdentity, ScriptlerError};
use thiserror::Error;

use crate::interpreter::InterpreterError;

/// All errors that can originate below the job bridge.
///
/// None of these escape [`crate::bridge::JobBridge::run_occurrence`]; they are
/// turned into execution records or a failed occurrence there.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The script could not be read from the store.
    #[error("Source unavailable for {identity}: {reason}")]
    SourceUnavailable {
        identity: ScriptIdentity,
        reason: String,
    },

    /// No script with this name exists in the store.
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// Target name of a create-like operation is already taken.
    #[error("Script already exists: {0}")]
    AlreadyExists(String),

    /// A dependency install ended Failed or Canceled.
    #[error("Dependency install failed: {0}")]
    DependencyInstall(String),

    /// The script itself raised or exited abnormally.
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),

    /// Another install session is outstanding for the same script.
    #[error("Install already in progress for {identity}")]
    InstallInProgress { identity: ScriptIdentity },

    /// The package delivery capability rejected or failed a request.
    #[error("Package delivery error: {0}")]
    Delivery(String),

    #[error(transparent)]
    Core(#[from] ScriptlerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecutorError>;
