//! `scriptler-executor`: everything that happens when a script occurrence fires.
//!
//! The pipeline driven by [`bridge::JobBridge`]:
//!
//! ```text
//! Start ─► ResolveDeps ─► (InstallIfNeeded) ─► Gate ─► Run ─► Done(success | failure)
//! ```
//!
//! - [`deps`]: best-effort scan of script source for imported packages.
//! - [`install`]: asynchronous install of missing units, one session per script.
//! - [`gate`]: keyword heuristic that asks for confirmation before network use
//!   (interactive runs only).
//! - [`runner`]: dispatches to an [`interpreter::Interpreter`] and turns every
//!   outcome into an [`scriptler_core::ExecutionRecord`].
//!
//! External capabilities are traits: [`store::ScriptStore`],
//! [`delivery::PackageDelivery`], [`interpreter::Interpreter`],
//! [`prompt::Prompt`] and [`prompt::Notifier`]. Filesystem, pip and
//! process-backed implementations are provided.

pub mod bridge;
pub mod delivery;
pub mod deps;
pub mod error;
pub mod gate;
pub mod install;
pub mod interpreter;
pub mod prompt;
pub mod runner;
pub mod store;

pub use bridge::{JobBridge, OccurrenceResult};
pub use error::{ExecutorError, Result};
pub use install::{InstallPolicy, InstallResolution, ModuleInstallCoordinator, PendingExecution};
pub use runner::ScriptRunner;
