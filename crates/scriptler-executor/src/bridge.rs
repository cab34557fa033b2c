//! JobBridge: one fired occurrence, start to finish.
//!
//! ```text
//! Start ─► ResolveDeps ─► (InstallIfNeeded) ─► Gate ─► Run ─► Done
//! ```
//!
//! Nothing below this point escapes as an error. Every path ends in an
//! [`OccurrenceResult`], which the scheduler turns into a completion report,
//! and every attempt that got past reading the source leaves one record in the
//! script's log.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scriptler_core::{ExecutionMode, ExecutionRecord, Language, ScriptIdentity};
use tracing::{debug, error, info, warn};

use crate::deps;
use crate::error::ExecutorError;
use crate::gate::{self, GateDecision};
use crate::install::{InstallResolution, ModuleInstallCoordinator, PendingExecution};
use crate::prompt::Prompt;
use crate::runner::ScriptRunner;
use crate::store::ScriptStore;

/// Message recorded when the user declines the network gate.
pub const CANCELLED_BY_USER: &str = "Execution cancelled by user";

/// What the scheduler learns about one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceResult {
    pub success: bool,
    /// The record written to the script's log, when one was produced.
    pub record: Option<ExecutionRecord>,
}

impl OccurrenceResult {
    fn failed(record: Option<ExecutionRecord>) -> Self {
        Self {
            success: false,
            record,
        }
    }

    fn from_record(record: ExecutionRecord) -> Self {
        Self {
            success: record.is_success(),
            record: Some(record),
        }
    }
}

/// Marks a script as executing; released on drop.
struct InFlight<'a> {
    running: &'a DashMap<ScriptIdentity, ()>,
    identity: ScriptIdentity,
}

impl<'a> InFlight<'a> {
    fn claim(running: &'a DashMap<ScriptIdentity, ()>, identity: &ScriptIdentity) -> Option<Self> {
        match running.entry(identity.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    running,
                    identity: identity.clone(),
                })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.identity);
    }
}

pub struct JobBridge {
    store: Arc<dyn ScriptStore>,
    coordinator: Arc<ModuleInstallCoordinator>,
    runner: Arc<ScriptRunner>,
    prompt: Arc<dyn Prompt>,
    running: DashMap<ScriptIdentity, ()>,
}

impl JobBridge {
    pub fn new(
        store: Arc<dyn ScriptStore>,
        coordinator: Arc<ModuleInstallCoordinator>,
        runner: Arc<ScriptRunner>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        Self {
            store,
            coordinator,
            runner,
            prompt,
            running: DashMap::new(),
        }
    }

    pub fn is_running(&self, identity: &ScriptIdentity) -> bool {
        self.running.contains_key(identity)
    }

    /// Drive one occurrence of `identity` through the pipeline.
    pub async fn run_occurrence(
        &self,
        identity: &ScriptIdentity,
        mode: ExecutionMode,
        args: &[String],
    ) -> OccurrenceResult {
        let Some(language) = identity.language() else {
            error!(%identity, "unsupported script type, occurrence failed");
            return OccurrenceResult::failed(None);
        };
        let Some(_in_flight) = InFlight::claim(&self.running, identity) else {
            warn!(%identity, "script is already executing, occurrence skipped");
            return OccurrenceResult::failed(None);
        };
        let name = identity.script_name();
        debug!(%identity, ?mode, "occurrence started");

        let source = match self.store.read(identity).await {
            Ok(source) => source,
            Err(e) => {
                error!(%identity, error = %e, "script source unavailable");
                let record = ExecutionRecord::error(
                    language,
                    name,
                    "Script source unavailable",
                    Some(e.to_string()),
                );
                self.log(identity, &record).await;
                return OccurrenceResult::failed(Some(record));
            }
        };

        let pending = PendingExecution {
            identity: identity.clone(),
            language,
            source,
            args: args.to_vec(),
        };
        let pending = match self.resolve_dependencies(pending, mode).await {
            Ok(pending) => pending,
            Err(record) => {
                self.log(identity, &record).await;
                return OccurrenceResult::failed(Some(record));
            }
        };

        let decision = gate::admit(
            &pending.source,
            language,
            &name,
            mode,
            self.prompt.as_ref(),
        )
        .await;
        if decision == GateDecision::Declined {
            let record = ExecutionRecord::success(language, name, CANCELLED_BY_USER);
            self.log(identity, &record).await;
            return OccurrenceResult::from_record(record);
        }

        let record = self
            .runner
            .run(
                &pending.identity,
                pending.language,
                &pending.source,
                &pending.args,
            )
            .await;
        self.log(identity, &record).await;
        info!(%identity, success = record.is_success(), "occurrence finished");
        OccurrenceResult::from_record(record)
    }

    /// Returns the execution to continue with, or the record that ends it.
    async fn resolve_dependencies(
        &self,
        pending: PendingExecution,
        mode: ExecutionMode,
    ) -> Result<PendingExecution, ExecutionRecord> {
        let language = pending.language;
        let identity = pending.identity.clone();
        let deps = deps::extract(&pending.source, language);
        let missing = self
            .coordinator
            .missing_units(&deps)
            .await
            .map_err(|e| self.abandon(&identity, language, "Dependency check failed", e))?;
        if missing.is_empty() {
            return Ok(pending);
        }

        info!(%identity, ?missing, "missing units, installing before run");
        match self
            .coordinator
            .install(pending, missing, mode, self.prompt.as_ref())
            .await
        {
            Ok(InstallResolution::Resume(pending)) => {
                if let Err(e) = self.runner.restart(language).await {
                    return Err(self.abandon(
                        &identity,
                        language,
                        "Interpreter restart failed",
                        e.into(),
                    ));
                }
                Ok(pending)
            }
            Ok(InstallResolution::Abandoned(record)) => {
                let reason = record.cause.clone().unwrap_or_else(|| record.message.clone());
                warn!(%identity, error = %ExecutorError::DependencyInstall(reason), "occurrence abandoned");
                Err(record)
            }
            Err(e) => Err(self.abandon(&identity, language, "Module installation not started", e)),
        }
    }

    fn abandon(
        &self,
        identity: &ScriptIdentity,
        language: Language,
        message: &str,
        err: ExecutorError,
    ) -> ExecutionRecord {
        warn!(%identity, error = %err, "{message}");
        ExecutionRecord::error(language, identity.script_name(), message, Some(err.to_string()))
    }

    /// Logging is best effort: a script whose directory is gone still
    /// completes its occurrence.
    async fn log(&self, identity: &ScriptIdentity, record: &ExecutionRecord) {
        if let Err(e) = self.store.append_log(identity, record).await {
            warn!(%identity, error = %e, "failed to append execution record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliverySessionId, InstallListener, PackageDelivery};
    use crate::install::InstallPolicy;
    use crate::interpreter::{Interpreter, InterpreterError, ScriptOutput};
    use crate::prompt::{FixedAnswer, TracingNotifier};
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemStore {
        sources: HashMap<ScriptIdentity, String>,
        logs: Mutex<Vec<ExecutionRecord>>,
    }

    #[async_trait]
    impl ScriptStore for MemStore {
        async fn read(&self, identity: &ScriptIdentity) -> crate::Result<String> {
            self.sources
                .get(identity)
                .cloned()
                .ok_or_else(|| ExecutorError::SourceUnavailable {
                    identity: identity.clone(),
                    reason: "not found".to_string(),
                })
        }

        async fn append_log(
            &self,
            _identity: &ScriptIdentity,
            record: &ExecutionRecord,
        ) -> crate::Result<()> {
            self.logs.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct NoDelivery;

    #[async_trait]
    impl PackageDelivery for NoDelivery {
        async fn installed_units(&self) -> crate::Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
        async fn request_install(
            &self,
            _units: &[String],
            _listener: InstallListener,
        ) -> crate::Result<DeliverySessionId> {
            Err(ExecutorError::Delivery("offline".to_string()))
        }
        async fn confirm(&self, _session: DeliverySessionId) -> crate::Result<()> {
            Ok(())
        }
        async fn cancel(&self, _session: DeliverySessionId) -> crate::Result<()> {
            Ok(())
        }
    }

    struct Ok1;

    #[async_trait]
    impl Interpreter for Ok1 {
        fn language(&self) -> Language {
            Language::Python
        }
        async fn execute(
            &self,
            _source: &str,
            _working_dir: Option<&Path>,
            _args: &[String],
        ) -> Result<ScriptOutput, InterpreterError> {
            Ok(ScriptOutput::default())
        }
    }

    fn bridge(sources: &[(&str, &str)]) -> (Arc<MemStore>, JobBridge) {
        let store = Arc::new(MemStore {
            sources: sources
                .iter()
                .map(|(id, src)| (ScriptIdentity::from(*id), src.to_string()))
                .collect(),
            ..MemStore::default()
        });
        let coordinator = Arc::new(ModuleInstallCoordinator::new(
            Arc::new(NoDelivery),
            InstallPolicy::default(),
        ));
        let runner = Arc::new(ScriptRunner::new(Arc::new(TracingNotifier)).with_interpreter(Arc::new(Ok1)));
        let bridge = JobBridge::new(store.clone(), coordinator, runner, Arc::new(FixedAnswer(false)));
        (store, bridge)
    }

    #[tokio::test]
    async fn unsupported_extension_fails_without_record() {
        let (store, bridge) = bridge(&[]);
        let res = bridge
            .run_occurrence(&ScriptIdentity::from("/s/a/a.rb"), ExecutionMode::Unattended, &[])
            .await;
        assert_eq!(res, OccurrenceResult::failed(None));
        assert!(store.logs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_source_fails_with_error_record() {
        let (store, bridge) = bridge(&[]);
        let res = bridge
            .run_occurrence(&ScriptIdentity::from("/s/a/a.py"), ExecutionMode::Unattended, &[])
            .await;
        assert!(!res.success);
        let logs = store.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "Script source unavailable");
    }

    #[tokio::test]
    async fn rejected_install_request_abandons_the_run() {
        let (store, bridge) = bridge(&[("/s/a/a.py", "import numpy\n")]);
        let res = bridge
            .run_occurrence(&ScriptIdentity::from("/s/a/a.py"), ExecutionMode::Unattended, &[])
            .await;
        assert!(!res.success);
        let record = res.record.unwrap();
        assert_eq!(record.message, "Module installation failed");
        assert_eq!(store.logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_flight_slot_is_released_after_the_run() {
        let (_store, bridge) = bridge(&[("/s/a/a.py", "print(1)\n")]);
        let id = ScriptIdentity::from("/s/a/a.py");
        assert!(bridge.run_occurrence(&id, ExecutionMode::Unattended, &[]).await.success);
        assert!(!bridge.is_running(&id));
        assert!(bridge.run_occurrence(&id, ExecutionMode::Unattended, &[]).await.success);
    }
}
