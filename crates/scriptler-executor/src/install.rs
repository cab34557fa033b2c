//! ModuleInstallCoordinator: installs missing units before a deferred run.
//!
//! # Session lifecycle
//!
//! ```text
//! Requested ─► InProgress ◄─► RequiresConfirmation
//!     │             │                 │
//!     └─────────────┴────────┬────────┘
//!                            ▼
//!              Installed | Failed(reason) | Canceled
//! ```
//!
//! At most one session exists per [`ScriptIdentity`]. The slot is claimed
//! atomically when a session starts and released (by token, so a newer
//! session is never released by an older one) when it reaches a terminal
//! state or the driving future is dropped.
//!
//! Each session gets its own update channel tagged with a monotonic token.
//! Closing the session drops the receiver, which is what deregisters the
//! listener: later callbacks from the delivery go nowhere.
//!
//! Unattended sessions that hit `RequiresConfirmation` wait at most
//! `confirmation_timeout`, then are canceled. The whole session is bounded by
//! `timeout`; expiry counts as `Canceled`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scriptler_core::config::InstallConfig;
use scriptler_core::{ExecutionMode, ExecutionRecord, Language, ScriptIdentity};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::delivery::{DeliverySessionId, InstallListener, InstallUpdate, PackageDelivery};
use crate::deps::DependencySet;
use crate::error::{ExecutorError, Result};
use crate::prompt::Prompt;

/// Packages that ship with the Python runtime and are never requested.
const PYTHON_BUILTINS: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "binascii", "bisect",
    "builtins", "bz2", "calendar", "cmath", "collections", "concurrent", "configparser",
    "contextlib", "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib", "dis",
    "email", "enum", "errno", "fnmatch", "fractions", "ftplib", "functools", "gc", "getpass",
    "glob", "gzip", "hashlib", "heapq", "hmac", "html", "http", "imaplib", "importlib", "inspect",
    "io", "ipaddress", "itertools", "json", "keyword", "locale", "logging", "lzma", "math",
    "mimetypes", "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle", "platform",
    "pprint", "queue", "random", "re", "sched", "secrets", "select", "shlex", "shutil", "signal",
    "smtplib", "socket", "sqlite3", "ssl", "stat", "statistics", "string", "struct", "subprocess",
    "sys", "tarfile", "tempfile", "textwrap", "threading", "time", "timeit", "tkinter", "token",
    "tokenize", "traceback", "types", "typing", "unicodedata", "unittest", "urllib", "uuid",
    "warnings", "weakref", "xml", "zipfile", "zlib", "zoneinfo",
];

/// A script run parked until its dependencies are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExecution {
    pub identity: ScriptIdentity,
    pub language: Language,
    pub source: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Requested,
    InProgress,
    RequiresConfirmation,
    Installed,
    Failed(String),
    Canceled,
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallState::Installed | InstallState::Failed(_) | InstallState::Canceled
        )
    }

    /// State after `update`. Terminal states absorb everything.
    pub fn apply(&self, update: &InstallUpdate) -> InstallState {
        if self.is_terminal() {
            return self.clone();
        }
        match update {
            InstallUpdate::InProgress => InstallState::InProgress,
            InstallUpdate::RequiresConfirmation => InstallState::RequiresConfirmation,
            InstallUpdate::Installed => InstallState::Installed,
            InstallUpdate::Failed(reason) => InstallState::Failed(reason.clone()),
            InstallUpdate::Canceled => InstallState::Canceled,
        }
    }
}

/// In-memory record of one install and the execution it is blocking.
#[derive(Debug)]
pub struct InstallSession {
    pub token: u64,
    pub requested_units: Vec<String>,
    pub state: InstallState,
    pub pending: PendingExecution,
    pub delivery_session: Option<DeliverySessionId>,
    /// Why the session was canceled on this side, if it was.
    pub detail: Option<String>,
}

/// How an install session ended for the execution it was holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallResolution {
    /// Units are installed; run this.
    Resume(PendingExecution),
    /// The run is abandoned; this record explains why.
    Abandoned(ExecutionRecord),
}

/// Naming convention and limits for installs.
#[derive(Debug, Clone)]
pub struct InstallPolicy {
    pub unit_prefix: String,
    /// Empty means every unit may be requested.
    pub allowed_units: BTreeSet<String>,
    pub builtin_packages: BTreeSet<String>,
    pub timeout: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for InstallPolicy {
    fn default() -> Self {
        Self::from_config(&InstallConfig::default())
    }
}

impl InstallPolicy {
    pub fn from_config(config: &InstallConfig) -> Self {
        Self {
            unit_prefix: config.unit_prefix.clone(),
            allowed_units: config.allowed_units.iter().cloned().collect(),
            builtin_packages: PYTHON_BUILTINS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(config.timeout_secs),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }

    /// Package id → installable-unit id.
    pub fn unit_for(&self, package: &str) -> String {
        format!("{}{}", self.unit_prefix, package.to_lowercase())
    }

    pub fn is_allowed(&self, unit: &str) -> bool {
        self.allowed_units.is_empty() || self.allowed_units.contains(unit)
    }
}

/// Releases the per-identity slot when the session ends, however it ends.
struct SessionSlot<'a> {
    sessions: &'a DashMap<ScriptIdentity, u64>,
    identity: ScriptIdentity,
    token: u64,
}

impl Drop for SessionSlot<'_> {
    fn drop(&mut self) {
        self.sessions
            .remove_if(&self.identity, |_, token| *token == self.token);
    }
}

pub struct ModuleInstallCoordinator {
    delivery: Arc<dyn PackageDelivery>,
    policy: InstallPolicy,
    sessions: DashMap<ScriptIdentity, u64>,
    next_token: AtomicU64,
}

impl ModuleInstallCoordinator {
    pub fn new(delivery: Arc<dyn PackageDelivery>, policy: InstallPolicy) -> Self {
        Self {
            delivery,
            policy,
            sessions: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Is an install currently outstanding for `identity`?
    pub fn is_pending(&self, identity: &ScriptIdentity) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Units needed by `deps` that the delivery does not have yet.
    ///
    /// Runtime builtins are never requested. With an allow-list configured,
    /// units outside it are logged and skipped.
    pub async fn missing_units(&self, deps: &DependencySet) -> Result<Vec<String>> {
        if deps.is_empty() {
            return Ok(Vec::new());
        }
        let installed = self.delivery.installed_units().await?;
        let mut missing = Vec::new();
        for package in deps {
            if self.policy.builtin_packages.contains(package) {
                continue;
            }
            let unit = self.policy.unit_for(package);
            if installed.contains(&unit) {
                continue;
            }
            if !self.policy.is_allowed(&unit) {
                warn!(%package, %unit, "unit not in allow-list, not requesting");
                continue;
            }
            missing.push(unit);
        }
        debug!(required = deps.len(), missing = missing.len(), "dependency check");
        Ok(missing)
    }

    /// Install `units` and decide what happens to `pending`.
    ///
    /// Fails only with [`ExecutorError::InstallInProgress`] when another
    /// session holds the slot for the same script; every other failure is an
    /// [`InstallResolution::Abandoned`] record.
    pub async fn install(
        &self,
        pending: PendingExecution,
        units: Vec<String>,
        mode: ExecutionMode,
        prompt: &dyn Prompt,
    ) -> Result<InstallResolution> {
        let identity = pending.identity.clone();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        match self.sessions.entry(identity.clone()) {
            Entry::Occupied(existing) => {
                warn!(%identity, active_session = *existing.get(), "install already in progress");
                return Err(ExecutorError::InstallInProgress { identity });
            }
            Entry::Vacant(slot) => {
                slot.insert(token);
            }
        }
        let _slot = SessionSlot {
            sessions: &self.sessions,
            identity: identity.clone(),
            token,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = InstallSession {
            token,
            requested_units: units,
            state: InstallState::Requested,
            pending,
            delivery_session: None,
            detail: None,
        };
        info!(%identity, session = token, units = ?session.requested_units, "install requested");

        match self
            .delivery
            .request_install(&session.requested_units, InstallListener::new(token, tx))
            .await
        {
            Ok(id) => session.delivery_session = Some(id),
            Err(e) => {
                warn!(%identity, session = token, error = %e, "install request rejected");
                session.state = InstallState::Failed(e.to_string());
                return Ok(self.resolve(session));
            }
        }

        let timeout = self.policy.timeout;
        if tokio::time::timeout(timeout, self.drive(&mut session, &mut rx, mode, prompt))
            .await
            .is_err()
        {
            warn!(%identity, session = token, timeout_secs = timeout.as_secs(), "install timed out");
            self.cancel_delivery(&session).await;
            session.state = InstallState::Canceled;
            session.detail = Some(format!("no result after {}s", timeout.as_secs()));
        }

        drop(rx);
        debug!(%identity, session = token, "install listener deregistered");
        Ok(self.resolve(session))
    }

    /// Feed updates into `session` until it is terminal.
    async fn drive(
        &self,
        session: &mut InstallSession,
        rx: &mut mpsc::UnboundedReceiver<(u64, InstallUpdate)>,
        mode: ExecutionMode,
        prompt: &dyn Prompt,
    ) {
        let identity = session.pending.identity.clone();
        loop {
            let waiting_unattended =
                session.state == InstallState::RequiresConfirmation && !mode.is_interactive();
            let next = if waiting_unattended {
                match tokio::time::timeout(self.policy.confirmation_timeout, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(%identity, session = session.token, "confirmation never arrived, canceling install");
                        self.cancel_delivery(session).await;
                        session.state = InstallState::Canceled;
                        session.detail =
                            Some("confirmation not available in unattended context".to_string());
                        return;
                    }
                }
            } else {
                rx.recv().await
            };

            let Some((token, update)) = next else {
                session.state =
                    InstallState::Failed("delivery ended without a result".to_string());
                return;
            };
            if token != session.token {
                warn!(%identity, session = session.token, stale = token, "ignoring stale install update");
                continue;
            }

            let next_state = session.state.apply(&update);
            if next_state == session.state {
                continue;
            }
            info!(%identity, session = session.token, from = ?session.state, to = ?next_state, "install state changed");
            session.state = next_state;

            if session.state.is_terminal() {
                return;
            }
            if session.state == InstallState::RequiresConfirmation {
                if mode.is_interactive() {
                    self.ask_user(session, prompt).await;
                    if session.state.is_terminal() {
                        return;
                    }
                } else {
                    warn!(%identity, session = session.token, "install needs confirmation but nobody can give it");
                }
            }
        }
    }

    async fn ask_user(&self, session: &mut InstallSession, prompt: &dyn Prompt) {
        let message = format!(
            "{} needs {} to run. Download now?",
            session.pending.identity.script_name(),
            session.requested_units.join(", ")
        );
        let Some(delivery_id) = session.delivery_session else {
            return;
        };
        if prompt.confirm("Install modules", &message).await {
            if let Err(e) = self.delivery.confirm(delivery_id).await {
                session.state = InstallState::Failed(e.to_string());
            }
        } else {
            info!(identity = %session.pending.identity, session = session.token, "install declined by user");
            self.cancel_delivery(session).await;
            session.state = InstallState::Canceled;
            session.detail = Some("declined by user".to_string());
        }
    }

    async fn cancel_delivery(&self, session: &InstallSession) {
        if let Some(id) = session.delivery_session {
            if let Err(e) = self.delivery.cancel(id).await {
                warn!(session = session.token, error = %e, "delivery cancel failed");
            }
        }
    }

    fn resolve(&self, session: InstallSession) -> InstallResolution {
        let InstallSession {
            state,
            pending,
            detail,
            token,
            ..
        } = session;
        let name = pending.identity.script_name();
        match state {
            InstallState::Installed => {
                info!(identity = %pending.identity, session = token, "install complete, resuming");
                InstallResolution::Resume(pending)
            }
            InstallState::Failed(reason) => InstallResolution::Abandoned(ExecutionRecord::error(
                pending.language,
                name,
                "Module installation failed",
                Some(reason),
            )),
            // Only reachable with a terminal state; anything else is a
            // cancellation from this side.
            _ => InstallResolution::Abandoned(ExecutionRecord::error(
                pending.language,
                name,
                "Module installation canceled",
                detail,
            )),
        }
    }
}
