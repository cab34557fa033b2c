//! Language runtimes.
//!
//! The [`Interpreter`] trait is the only thing the runner knows about a
//! runtime. [`ProcessInterpreter`] implements it by piping the script source
//! into `python3 -` / `node -` and treating a non-zero exit as a raised error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use scriptler_core::config::InterpreterConfig;
use scriptler_core::Language;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// A fault raised by the script itself (or by the runtime while running it).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct InterpreterError {
    pub message: String,
    pub cause: Option<String>,
}

impl InterpreterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }
}

/// What a completed script printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    fn language(&self) -> Language;

    /// Run `source` to completion. `working_dir` is a hint: the directory the
    /// script lives in, so relative file access behaves as the user expects.
    async fn execute(
        &self,
        source: &str,
        working_dir: Option<&Path>,
        args: &[String],
    ) -> Result<ScriptOutput, InterpreterError>;

    /// Re-initialise after new units were installed. Runtimes that pick up
    /// new packages on their own can keep the default.
    async fn restart(&self) -> Result<(), InterpreterError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Process-backed runtime
// ---------------------------------------------------------------------------

pub struct ProcessInterpreter {
    language: Language,
    command: String,
    timeout: Duration,
    site_dir: Option<PathBuf>,
}

impl ProcessInterpreter {
    pub fn new(language: Language, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            language,
            command: command.into(),
            timeout,
            site_dir: None,
        }
    }

    /// Extra import directory exposed to the script (`PYTHONPATH` / `NODE_PATH`).
    pub fn with_site_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.site_dir = Some(dir.into());
        self
    }

    /// Build the runtime for `language` from the `[interpreter]` config section.
    pub fn from_config(language: Language, config: &InterpreterConfig) -> Self {
        let command = match language {
            Language::Python => &config.python,
            Language::JavaScript => &config.node,
        };
        let interpreter = Self::new(language, command, Duration::from_secs(config.timeout_secs));
        match &config.site_dir {
            Some(dir) => interpreter.with_site_dir(dir),
            None => interpreter,
        }
    }

    fn path_var(&self) -> &'static str {
        match self.language {
            Language::Python => "PYTHONPATH",
            Language::JavaScript => "NODE_PATH",
        }
    }
}

#[async_trait]
impl Interpreter for ProcessInterpreter {
    fn language(&self) -> Language {
        self.language
    }

    async fn execute(
        &self,
        source: &str,
        working_dir: Option<&Path>,
        args: &[String],
    ) -> Result<ScriptOutput, InterpreterError> {
        let mut cmd = tokio::process::Command::new(&self.command);
        // `-` makes both python and node read the program from stdin.
        cmd.arg("-")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        if let Some(site) = &self.site_dir {
            cmd.env(self.path_var(), site);
        }

        debug!(command = %self.command, language = %self.language, bytes = source.len(), "spawning interpreter");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                InterpreterError::with_cause(
                    format!("{} runtime not found", self.language),
                    format!("command '{}' is not installed", self.command),
                )
            } else {
                InterpreterError::with_cause("failed to start interpreter", e.to_string())
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await.map_err(|e| {
                InterpreterError::with_cause("failed to pass source to interpreter", e.to_string())
            })?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                return Err(InterpreterError::with_cause(
                    "script timed out",
                    format!("no exit after {}s", self.timeout.as_secs()),
                ))
            }
            Ok(Err(e)) => {
                return Err(InterpreterError::with_cause("interpreter process error", e.to_string()))
            }
            Ok(Ok(out)) => out,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        if output.status.success() {
            return Ok(ScriptOutput { stdout });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = last_error_line(&stderr)
            .unwrap_or("script exited abnormally")
            .to_string();
        let cause = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        Err(InterpreterError::with_cause(message, cause))
    }

    async fn restart(&self) -> Result<(), InterpreterError> {
        let status = tokio::process::Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| InterpreterError::with_cause("interpreter restart failed", e.to_string()))?;
        if !status.success() {
            return Err(InterpreterError::new(format!(
                "{} runtime unhealthy after restart",
                self.language
            )));
        }
        info!(language = %self.language, command = %self.command, "interpreter re-initialised");
        Ok(())
    }
}

/// Tracebacks end with the exception line (`ValueError: bad`), which is the
/// most useful one-line summary.
fn last_error_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).rfind(|l| !l.is_empty())
}
