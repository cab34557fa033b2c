//! ScriptRunner: interpreter dispatch with a no-throw boundary.

use std::collections::HashMap;
use std::sync::Arc;

use scriptler_core::{ExecutionRecord, Language, ScriptIdentity};
use tracing::{info, warn};

use crate::interpreter::{Interpreter, InterpreterError};
use crate::prompt::Notifier;

/// Longest stdout excerpt kept in a success record.
const OUTPUT_EXCERPT_CHARS: usize = 200;

pub struct ScriptRunner {
    interpreters: HashMap<Language, Arc<dyn Interpreter>>,
    notifier: Arc<dyn Notifier>,
}

impl ScriptRunner {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            interpreters: HashMap::new(),
            notifier,
        }
    }

    /// Register `interpreter` for the language it reports. Replaces any
    /// previous registration for that language.
    pub fn with_interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreters.insert(interpreter.language(), interpreter);
        self
    }

    /// Run `source` and describe the outcome. Never fails: interpreter faults,
    /// missing runtimes and timeouts all become `Error` records.
    pub async fn run(
        &self,
        identity: &ScriptIdentity,
        language: Language,
        source: &str,
        args: &[String],
    ) -> ExecutionRecord {
        let name = identity.script_name();
        let Some(interpreter) = self.interpreters.get(&language) else {
            warn!(%identity, %language, "no interpreter registered");
            let record = ExecutionRecord::error(
                language,
                name,
                format!("No {language} interpreter available"),
                None,
            );
            self.announce(&record);
            return record;
        };

        let working_dir = identity.path();
        let working_dir = working_dir.parent().filter(|p| p.is_dir());

        let record = match interpreter.execute(source, working_dir, args).await {
            Ok(output) => {
                info!(%identity, %language, "script completed");
                let message = if output.stdout.is_empty() {
                    "Script executed successfully".to_string()
                } else {
                    format!(
                        "Script executed successfully: {}",
                        excerpt(&output.stdout, OUTPUT_EXCERPT_CHARS)
                    )
                };
                ExecutionRecord::success(language, name, message)
            }
            Err(InterpreterError { message, cause }) => {
                warn!(%identity, %language, error = %message, ?cause, "script raised");
                ExecutionRecord::error(language, name, message, cause)
            }
        };
        self.announce(&record);
        record
    }

    /// Re-initialise the runtime for `language` after an install.
    pub async fn restart(&self, language: Language) -> Result<(), InterpreterError> {
        match self.interpreters.get(&language) {
            Some(interpreter) => interpreter.restart().await,
            None => Err(InterpreterError::new(format!(
                "No {language} interpreter available"
            ))),
        }
    }

    fn announce(&self, record: &ExecutionRecord) {
        let title = if record.is_success() {
            "Script finished"
        } else {
            "Script failed"
        };
        self.notifier
            .notify(title, &format!("{}: {}", record.script_name, record.message));
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.trim();
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::ScriptOutput;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct Echo {
        language: Language,
        fail: bool,
    }

    #[async_trait]
    impl Interpreter for Echo {
        fn language(&self) -> Language {
            self.language
        }

        async fn execute(
            &self,
            source: &str,
            _working_dir: Option<&Path>,
            args: &[String],
        ) -> Result<ScriptOutput, InterpreterError> {
            if self.fail {
                Err(InterpreterError::with_cause("NameError: x", "exit code 1"))
            } else {
                Ok(ScriptOutput {
                    stdout: format!("{source} {}", args.join(" ")),
                })
            }
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl Notifier for Collect {
        fn notify(&self, title: &str, _message: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    fn runner(fail: bool, notes: Arc<Collect>) -> ScriptRunner {
        ScriptRunner::new(notes).with_interpreter(Arc::new(Echo {
            language: Language::Python,
            fail,
        }))
    }

    #[tokio::test]
    async fn success_record_carries_output() {
        let notes = Arc::new(Collect::default());
        let id = ScriptIdentity::from("/s/hello/hello.py");
        let rec = runner(false, notes.clone())
            .run(&id, Language::Python, "hi", &["a".to_string()])
            .await;
        assert!(rec.is_success());
        assert_eq!(rec.script_name, "hello.py");
        assert!(rec.message.ends_with("hi a"));
        assert_eq!(*notes.0.lock().unwrap(), vec!["Script finished".to_string()]);
    }

    #[tokio::test]
    async fn interpreter_fault_becomes_error_record() {
        let notes = Arc::new(Collect::default());
        let id = ScriptIdentity::from("/s/hello/hello.py");
        let rec = runner(true, notes.clone())
            .run(&id, Language::Python, "x", &[])
            .await;
        assert!(!rec.is_success());
        assert_eq!(rec.message, "NameError: x");
        assert_eq!(rec.cause.as_deref(), Some("exit code 1"));
        assert_eq!(*notes.0.lock().unwrap(), vec!["Script failed".to_string()]);
    }

    #[tokio::test]
    async fn unregistered_language_is_an_error_record() {
        let notes = Arc::new(Collect::default());
        let id = ScriptIdentity::from("/s/app/app.js");
        let r = runner(false, notes);
        let rec = r.run(&id, Language::JavaScript, "1", &[]).await;
        assert!(!rec.is_success());
        assert!(r.restart(Language::JavaScript).await.is_err());
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo", 2), "hé…");
        assert_eq!(excerpt("  short \n", 10), "short");
    }
}
