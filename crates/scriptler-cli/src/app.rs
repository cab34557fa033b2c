//! Builds the runtime pieces from config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scriptler_core::{config::ScriptlerConfig, Language};
use scriptler_executor::delivery::PipDelivery;
use scriptler_executor::interpreter::ProcessInterpreter;
use scriptler_executor::prompt::{Notifier, Prompt};
use scriptler_executor::store::FsScriptStore;
use scriptler_executor::{InstallPolicy, JobBridge, ModuleInstallCoordinator, ScriptRunner};
use scriptler_scheduler::SchedulerHandle;
use tracing::info;

pub struct App {
    pub config: ScriptlerConfig,
    pub store: Arc<FsScriptStore>,
}

impl App {
    pub fn new(config: ScriptlerConfig) -> Self {
        let store = Arc::new(FsScriptStore::new(
            &config.storage.scripts_dir,
            &config.storage.log_file_name,
        ));
        Self { config, store }
    }

    /// Open (and migrate) the scheduler database.
    pub fn scheduler(&self) -> anyhow::Result<SchedulerHandle> {
        let db_path = &self.config.database.path;
        ensure_parent_dir(db_path)?;
        info!(path = %db_path, "opening SQLite database");
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(SchedulerHandle::new(conn)?)
    }

    /// Full execution pipeline with the given user-facing sinks.
    pub fn bridge(&self, prompt: Arc<dyn Prompt>, notifier: Arc<dyn Notifier>) -> JobBridge {
        let site_dir = self.config.interpreter.effective_site_dir();

        let delivery = Arc::new(PipDelivery::new(
            &self.config.install.pip,
            &site_dir,
            &self.config.install.unit_prefix,
        ));
        let coordinator = Arc::new(ModuleInstallCoordinator::new(
            delivery,
            InstallPolicy::from_config(&self.config.install),
        ));

        let mut runner = ScriptRunner::new(notifier);
        for language in Language::ALL {
            let interpreter = ProcessInterpreter::from_config(language, &self.config.interpreter)
                .with_site_dir(&site_dir);
            runner = runner.with_interpreter(Arc::new(interpreter));
        }

        JobBridge::new(self.store.clone(), coordinator, Arc::new(runner), prompt)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.config.scheduler.tick_ms.max(1))
    }
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state/nested/scheduler.db");
        ensure_parent_dir(db.to_str().unwrap()).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }

    #[test]
    fn unusable_database_directory_reports_the_cause() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let db = blocker.join("scheduler.db");

        let err = ensure_parent_dir(db.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("cannot create directory"), "{err}");
    }
}
