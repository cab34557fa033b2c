//! Terminal-backed prompt and notifier for interactive runs.

use async_trait::async_trait;
use scriptler_executor::prompt::{Notifier, Prompt};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Asks on stderr and reads `y`/`n` from stdin. Anything but a yes is a no.
pub struct StdinPrompt;

#[async_trait]
impl Prompt for StdinPrompt {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        eprint!("[{title}] {message} [y/N] ");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                tracing::warn!(error = %e, "could not read answer, treating as no");
                false
            }
        }
    }
}

/// Prints toast-style notices to stderr.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str) {
        eprintln!("* {title}: {message}");
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }
}
