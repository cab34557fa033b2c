//! Script Store: where script text and execution logs live.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/
//!   backup/
//!     backup.py        script source; its path is the ScriptIdentity
//!     execution.log    one ExecutionRecord per line, append-only
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scriptler_core::{ExecutionRecord, Language, ScriptIdentity, ScriptlerError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ExecutorError, Result};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

/// What the job bridge needs from storage.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Current source text. Any failure is [`ExecutorError::SourceUnavailable`].
    async fn read(&self, identity: &ScriptIdentity) -> Result<String>;

    /// Append one record to the script's log.
    async fn append_log(&self, identity: &ScriptIdentity, record: &ExecutionRecord) -> Result<()>;
}

/// A script as listed by [`FsScriptStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: String,
    pub language: Language,
    pub identity: ScriptIdentity,
}

pub struct FsScriptStore {
    root: PathBuf,
    log_file_name: String,
}

impl FsScriptStore {
    pub fn new(root: impl Into<PathBuf>, log_file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            log_file_name: log_file_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validate_name(name: &str) -> Result<()> {
        if NAME_RE.is_match(name) {
            Ok(())
        } else {
            Err(ScriptlerError::InvalidName {
                name: name.to_string(),
            }
            .into())
        }
    }

    fn identity_for(&self, name: &str, language: Language) -> ScriptIdentity {
        ScriptIdentity::from_path(
            self.root
                .join(name)
                .join(format!("{name}.{}", language.extension())),
        )
    }

    fn log_path(&self, identity: &ScriptIdentity) -> PathBuf {
        let path = identity.path();
        path.parent()
            .unwrap_or(self.root.as_path())
            .join(&self.log_file_name)
    }

    /// All scripts under the root, sorted by name. A missing root is empty.
    pub async fn list(&self) -> Result<Vec<ScriptEntry>> {
        let mut scripts = Vec::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scripts),
            Err(e) => return Err(e.into()),
        };
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let name = dir.file_name().to_string_lossy().into_owned();
            if let Some(entry) = self.lookup(&name).await {
                scripts.push(entry);
            }
        }
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    /// Look a script up by name.
    pub async fn find(&self, name: &str) -> Result<ScriptEntry> {
        Self::validate_name(name)?;
        self.lookup(name)
            .await
            .ok_or_else(|| ExecutorError::ScriptNotFound(name.to_string()))
    }

    async fn lookup(&self, name: &str) -> Option<ScriptEntry> {
        for language in Language::ALL {
            let identity = self.identity_for(name, language);
            if tokio::fs::try_exists(identity.path()).await.unwrap_or(false) {
                return Some(ScriptEntry {
                    name: name.to_string(),
                    language,
                    identity,
                });
            }
        }
        None
    }

    /// Create an empty script. An existing script with that name is returned
    /// unchanged, whatever its language.
    pub async fn create(&self, name: &str, language: Language) -> Result<ScriptEntry> {
        Self::validate_name(name)?;
        if let Some(existing) = self.lookup(name).await {
            debug!(name, "script already exists");
            return Ok(existing);
        }
        let identity = self.identity_for(name, language);
        tokio::fs::create_dir_all(self.root.join(name)).await?;
        tokio::fs::write(identity.path(), "").await?;
        info!(%identity, %language, "script created");
        Ok(ScriptEntry {
            name: name.to_string(),
            language,
            identity,
        })
    }

    pub async fn write(&self, identity: &ScriptIdentity, source: &str) -> Result<()> {
        tokio::fs::write(identity.path(), source).await?;
        debug!(%identity, bytes = source.len(), "script saved");
        Ok(())
    }

    /// Rename the script directory and file; the log moves with it.
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<ScriptEntry> {
        Self::validate_name(new_name)?;
        let entry = self.find(name).await?;
        if self.lookup(new_name).await.is_some() {
            return Err(ExecutorError::AlreadyExists(new_name.to_string()));
        }
        let new_dir = self.root.join(new_name);
        tokio::fs::rename(self.root.join(name), &new_dir).await?;
        let ext = entry.language.extension();
        tokio::fs::rename(
            new_dir.join(format!("{name}.{ext}")),
            new_dir.join(format!("{new_name}.{ext}")),
        )
        .await?;
        info!(from = name, to = new_name, "script renamed");
        Ok(ScriptEntry {
            name: new_name.to_string(),
            language: entry.language,
            identity: self.identity_for(new_name, entry.language),
        })
    }

    /// Remove the script directory, log included.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let entry = self.find(name).await?;
        tokio::fs::remove_dir_all(self.root.join(name)).await?;
        info!(identity = %entry.identity, "script deleted");
        Ok(())
    }

    /// Whole log text; empty when the script has never run.
    pub async fn read_log(&self, identity: &ScriptIdentity) -> Result<String> {
        match tokio::fs::read_to_string(self.log_path(identity)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ScriptStore for FsScriptStore {
    async fn read(&self, identity: &ScriptIdentity) -> Result<String> {
        tokio::fs::read_to_string(identity.path())
            .await
            .map_err(|e| ExecutorError::SourceUnavailable {
                identity: identity.clone(),
                reason: e.to_string(),
            })
    }

    async fn append_log(&self, identity: &ScriptIdentity, record: &ExecutionRecord) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(identity))
            .await?;
        file.write_all(format!("{record}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
