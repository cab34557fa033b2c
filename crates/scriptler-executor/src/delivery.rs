//! Package delivery: the capability that actually installs units.
//!
//! Delivery is asynchronous. `request_install` returns as soon as the request
//! is accepted; progress arrives later on the [`InstallListener`] handed in with
//! the request, from whatever task the delivery runs on. Each update is tagged
//! with the listener's session token so the coordinator can drop updates for
//! sessions it has already closed.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};

/// Progress reported by a delivery for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallUpdate {
    InProgress,
    /// Delivery is waiting for a user to approve the download.
    RequiresConfirmation,
    Installed,
    /// Carries the delivery's failure code or reason.
    Failed(String),
    Canceled,
}

impl InstallUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallUpdate::Installed | InstallUpdate::Failed(_) | InstallUpdate::Canceled
        )
    }
}

/// Delivery-side identifier for an accepted request.
pub type DeliverySessionId = u64;

/// Where a delivery posts updates for one install session.
///
/// Cloneable and usable from any task. Once the coordinator has closed the
/// session the receiving end is gone and [`InstallListener::notify`] returns
/// `false`; deliveries may use that to stop reporting.
#[derive(Debug, Clone)]
pub struct InstallListener {
    token: u64,
    tx: mpsc::UnboundedSender<(u64, InstallUpdate)>,
}

impl InstallListener {
    pub fn new(token: u64, tx: mpsc::UnboundedSender<(u64, InstallUpdate)>) -> Self {
        Self { token, tx }
    }

    pub fn notify(&self, update: InstallUpdate) -> bool {
        self.tx.send((self.token, update)).is_ok()
    }
}

#[async_trait]
pub trait PackageDelivery: Send + Sync {
    /// Units already available to the runtime.
    async fn installed_units(&self) -> Result<BTreeSet<String>>;

    /// Start installing `units`. Must return promptly; progress goes to `listener`.
    async fn request_install(
        &self,
        units: &[String],
        listener: InstallListener,
    ) -> Result<DeliverySessionId>;

    /// The user approved a request that reported `RequiresConfirmation`.
    async fn confirm(&self, session: DeliverySessionId) -> Result<()>;

    /// Abandon a request. Idempotent; unknown sessions are ignored.
    async fn cancel(&self, session: DeliverySessionId) -> Result<()>;
}

// ---------------------------------------------------------------------------
// pip-backed delivery
// ---------------------------------------------------------------------------

/// Installs units with `pip install --target <site_dir>`.
///
/// A unit id is `prefix + package`; the prefix is stripped to get the pip
/// package name. pip never asks for confirmation, so `confirm` has nothing to
/// do.
pub struct PipDelivery {
    pip: String,
    site_dir: PathBuf,
    unit_prefix: String,
    next_id: AtomicU64,
    running: Arc<DashMap<DeliverySessionId, Running>>,
}

struct Running {
    abort: AbortHandle,
    listener: InstallListener,
}

impl PipDelivery {
    pub fn new(pip: impl Into<String>, site_dir: impl Into<PathBuf>, unit_prefix: impl Into<String>) -> Self {
        Self {
            pip: pip.into(),
            site_dir: site_dir.into(),
            unit_prefix: unit_prefix.into(),
            next_id: AtomicU64::new(1),
            running: Arc::new(DashMap::new()),
        }
    }

    fn package_for<'a>(&self, unit: &'a str) -> &'a str {
        unit.strip_prefix(self.unit_prefix.as_str()).unwrap_or(unit)
    }
}

#[async_trait]
impl PackageDelivery for PipDelivery {
    async fn installed_units(&self) -> Result<BTreeSet<String>> {
        let mut units = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.site_dir).await {
            Ok(entries) => entries,
            // Nothing installed yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(units),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".dist-info") || name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            // Single-module installs land as `name.py`.
            let name = name.strip_suffix(".py").unwrap_or(&name);
            units.insert(format!("{}{}", self.unit_prefix, name.to_lowercase()));
        }
        Ok(units)
    }

    async fn request_install(
        &self,
        units: &[String],
        listener: InstallListener,
    ) -> Result<DeliverySessionId> {
        if units.is_empty() {
            return Err(ExecutorError::Delivery("empty install request".to_string()));
        }
        tokio::fs::create_dir_all(&self.site_dir).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let packages: Vec<String> = units.iter().map(|u| self.package_for(u).to_string()).collect();
        let mut cmd = tokio::process::Command::new(&self.pip);
        cmd.arg("install")
            .arg("--quiet")
            .arg("--disable-pip-version-check")
            .arg("--target")
            .arg(&self.site_dir)
            .args(&packages)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(session = id, ?packages, "pip install requested");

        let task_listener = listener.clone();
        let running = Arc::clone(&self.running);
        let pip = self.pip.clone();
        // The task waits until the session is registered, so its own `remove`
        // always finds the entry.
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            if start_rx.await.is_err() {
                return;
            }
            task_listener.notify(InstallUpdate::InProgress);
            let update = match cmd.output().await {
                Ok(out) if out.status.success() => InstallUpdate::Installed,
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    let reason = stderr
                        .lines()
                        .map(str::trim)
                        .rfind(|l| !l.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{pip} exited with {}", out.status));
                    InstallUpdate::Failed(reason)
                }
                Err(e) => InstallUpdate::Failed(format!("failed to run {pip}: {e}")),
            };
            running.remove(&id);
            debug!(session = id, ?update, "pip install finished");
            task_listener.notify(update);
        });

        self.running.insert(
            id,
            Running {
                abort: task.abort_handle(),
                listener,
            },
        );
        let _ = start_tx.send(());
        Ok(id)
    }

    async fn confirm(&self, session: DeliverySessionId) -> Result<()> {
        debug!(session, "pip needs no confirmation");
        Ok(())
    }

    async fn cancel(&self, session: DeliverySessionId) -> Result<()> {
        if let Some((_, running)) = self.running.remove(&session) {
            running.abort.abort();
            running.listener.notify(InstallUpdate::Canceled);
            warn!(session, "pip install canceled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = InstallListener::new(7, tx);
        assert!(listener.notify(InstallUpdate::InProgress));
        drop(rx);
        assert!(!listener.notify(InstallUpdate::Installed));
    }

    #[test]
    fn terminal_updates() {
        assert!(InstallUpdate::Installed.is_terminal());
        assert!(InstallUpdate::Failed("x".into()).is_terminal());
        assert!(InstallUpdate::Canceled.is_terminal());
        assert!(!InstallUpdate::RequiresConfirmation.is_terminal());
        assert!(!InstallUpdate::InProgress.is_terminal());
    }

    #[tokio::test]
    async fn installed_units_reads_site_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Requests")).unwrap();
        std::fs::create_dir(dir.path().join("requests-2.32.0.dist-info")).unwrap();
        std::fs::create_dir(dir.path().join("__pycache__")).unwrap();
        std::fs::write(dir.path().join("six.py"), "").unwrap();

        let delivery = PipDelivery::new("pip3", dir.path(), "feature_");
        let units = delivery.installed_units().await.unwrap();
        let expected: BTreeSet<String> =
            ["feature_requests", "feature_six"].iter().map(|s| s.to_string()).collect();
        assert_eq!(units, expected);
    }

    #[tokio::test]
    async fn missing_site_dir_means_nothing_installed() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = PipDelivery::new("pip3", dir.path().join("absent"), "feature_");
        assert!(delivery.installed_units().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_pip_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = PipDelivery::new("scriptler-no-such-pip", dir.path(), "feature_");
        let (tx, mut rx) = mpsc::unbounded_channel();
        delivery
            .request_install(&["feature_requests".to_string()], InstallListener::new(3, tx))
            .await
            .unwrap();

        let mut last = None;
        while let Some((token, update)) = rx.recv().await {
            assert_eq!(token, 3);
            let done = update.is_terminal();
            last = Some(update);
            if done {
                break;
            }
        }
        assert!(matches!(last, Some(InstallUpdate::Failed(_))));
    }

    #[test]
    fn prefix_is_stripped_for_pip() {
        let delivery = PipDelivery::new("pip3", "/tmp/site", "feature_");
        assert_eq!(delivery.package_for("feature_numpy"), "numpy");
        assert_eq!(delivery.package_for("numpy"), "numpy");
    }
}
