//! Network-use gate for script execution.
//!
//! Flags scripts that look like they reach the network so an interactive user
//! can confirm before they run. This is advisory, not a sandbox: a flagged
//! script is never blocked outright, and unattended runs skip the question
//! entirely because nobody is there to answer it.
//!
//! Matching is a case-insensitive substring scan against a fixed keyword list
//! per language; the first match is reported so the prompt can say why.

use scriptler_core::{ExecutionMode, Language};
use tracing::{debug, info};

use crate::prompt::Prompt;

/// Outcome of passing a script through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// The interactive user said no. Cancels this run only.
    Declined,
}

/// Should running `source` trigger a network-access warning?
pub fn should_warn(source: &str, language: Language) -> bool {
    matched_keyword(source, language).is_some()
}

/// The first network keyword found in `source`, if any.
pub fn matched_keyword(source: &str, language: Language) -> Option<&'static str> {
    let lower = source.to_lowercase();
    keywords(language)
        .iter()
        .copied()
        .find(|keyword| lower.contains(keyword))
}

/// Run the gate: warn-worthy scripts in interactive mode need a yes from
/// `prompt`; everything else proceeds immediately.
pub async fn admit(
    source: &str,
    language: Language,
    script_name: &str,
    mode: ExecutionMode,
    prompt: &dyn Prompt,
) -> GateDecision {
    let Some(keyword) = matched_keyword(source, language) else {
        return GateDecision::Proceed;
    };

    if !mode.is_interactive() {
        debug!(script = script_name, keyword, "network gate bypassed for unattended run");
        return GateDecision::Proceed;
    }

    let message = format!(
        "{script_name} appears to use the network (matched `{keyword}`). Run it anyway?"
    );
    if prompt.confirm("Network access", &message).await {
        GateDecision::Proceed
    } else {
        info!(script = script_name, keyword, "execution declined at network gate");
        GateDecision::Declined
    }
}

fn keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => PYTHON_NETWORK_KEYWORDS,
        Language::JavaScript => JS_NETWORK_KEYWORDS,
    }
}

// ---------------------------------------------------------------------------
// Keyword lists
// ---------------------------------------------------------------------------

/// All entries are lowercase; the source is lowercased before matching.
const PYTHON_NETWORK_KEYWORDS: &[&str] = &[
    "socket",
    "requests.",
    "import requests",
    "urllib",
    "http.client",
    "httpx",
    "aiohttp",
    "ftplib",
    "smtplib",
    "telnetlib",
    "paramiko",
    "websocket",
];

const JS_NETWORK_KEYWORDS: &[&str] = &[
    "fetch(",
    "xmlhttprequest",
    "websocket",
    "eventsource",
    "sendbeacon",
    "require('http",
    "require(\"http",
    "require('net",
    "require(\"net",
    "from 'http",
    "from \"http",
    "axios",
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPrompt {
        answer: bool,
        asked: AtomicUsize,
    }

    impl CountingPrompt {
        fn new(answer: bool) -> Self {
            Self {
                answer,
                asked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prompt for CountingPrompt {
        async fn confirm(&self, _title: &str, _message: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[test]
    fn python_requests_call_warns() {
        assert!(should_warn("r = requests.get('https://x')", Language::Python));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            matched_keyword("s = SOCKET.create_connection(addr)", Language::Python),
            Some("socket")
        );
        assert!(should_warn("new XMLHttpRequest()", Language::JavaScript));
    }

    #[test]
    fn keyword_lists_are_per_language() {
        // `fetch(` is only a JavaScript keyword.
        assert!(!should_warn("value = cursor.fetch(1)", Language::Python));
        assert!(should_warn("await fetch(url)", Language::JavaScript));
    }

    #[test]
    fn plain_scripts_do_not_warn() {
        assert!(!should_warn("print(sum(range(10)))", Language::Python));
        assert!(!should_warn("console.log(1 + 1)", Language::JavaScript));
    }

    #[tokio::test]
    async fn unattended_runs_never_prompt() {
        let prompt = CountingPrompt::new(false);
        let decision = admit(
            "requests.get(u)",
            Language::Python,
            "a.py",
            ExecutionMode::Unattended,
            &prompt,
        )
        .await;
        assert_eq!(decision, GateDecision::Proceed);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interactive_decline_is_reported() {
        let prompt = CountingPrompt::new(false);
        let decision = admit(
            "requests.get(u)",
            Language::Python,
            "a.py",
            ExecutionMode::Interactive,
            &prompt,
        )
        .await;
        assert_eq!(decision, GateDecision::Declined);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn harmless_interactive_script_is_not_questioned() {
        let prompt = CountingPrompt::new(false);
        let decision = admit(
            "print('hi')",
            Language::Python,
            "a.py",
            ExecutionMode::Interactive,
            &prompt,
        )
        .await;
        assert_eq!(decision, GateDecision::Proceed);
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 0);
    }
}
