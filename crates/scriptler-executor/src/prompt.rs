//! User-facing side channels: confirmation prompts and completion notices.

use async_trait::async_trait;
use tracing::info;

/// Yes/no question to an interactive user.
///
/// Only ever consulted for interactive executions.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Fire-and-forget notice (toast, desktop notification, log line).
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Notifier for unattended runs: notices become structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(target: "scriptler::notification", title, message, "notification");
    }
}

/// Prompt that answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Prompt for FixedAnswer {
    async fn confirm(&self, title: &str, _message: &str) -> bool {
        info!(title, answer = self.0, "prompt answered automatically");
        self.0
    }
}
