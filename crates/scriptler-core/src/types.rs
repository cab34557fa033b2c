use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ScriptlerError;

// ---------------------------------------------------------------------------
// ScriptIdentity
// ---------------------------------------------------------------------------

/// Stable key for a script: its storage location.
///
/// Used as the scheduler's cancellation/lookup tag and as the key of the
/// install-session table, so two identities compare equal exactly when they
/// point at the same script file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptIdentity(pub String);

impl ScriptIdentity {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// File name of the script (`hello.py`), or the raw identity when it has none.
    pub fn script_name(&self) -> String {
        Path::new(&self.0)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.clone())
    }

    /// Language implied by the file extension, if it is a supported one.
    pub fn language(&self) -> Option<Language> {
        Language::from_path(Path::new(&self.0))
    }
}

impl fmt::Display for ScriptIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ScriptIdentity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ScriptIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// The two supported script languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Language {
    type Err = ScriptlerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            other => Err(ScriptlerError::UnsupportedLanguage(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// Whether someone is around to answer confirmation prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Started by a user action; prompts and toasts are available.
    Interactive,
    /// Started by the job scheduler; nobody can confirm anything.
    Unattended,
}

impl ExecutionMode {
    pub fn is_interactive(&self) -> bool {
        matches!(self, ExecutionMode::Interactive)
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Error,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordStatus::Success => "SUCCESS",
            RecordStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// One structured outcome entry for a single run attempt.
///
/// Appended to the script's log as a single line (see the `Display` impl).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub language: Language,
    pub script_name: String,
    pub status: RecordStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ExecutionRecord {
    pub fn success(
        language: Language,
        script_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            language,
            script_name: script_name.into(),
            status: RecordStatus::Success,
            message: message.into(),
            cause: None,
        }
    }

    pub fn error(
        language: Language,
        script_name: impl Into<String>,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            language,
            script_name: script_name.into(),
            status: RecordStatus::Error,
            message: message.into(),
            cause,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }
}

impl fmt::Display for ExecutionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Newlines inside messages would split one record over several log lines.
        let message = self.message.replace('\n', " ");
        write!(
            f,
            "{} [{}] {} {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.language,
            self.script_name,
            self.status,
            message
        )?;
        if let Some(cause) = &self.cause {
            write!(f, " (cause: {})", cause.replace('\n', " "))?;
        }
        Ok(())
    }
}
