//! Terminal prompts.

use crate::sync::conflict::Prompter;
use crate::sync::report::format_text_diff;
use dialoguer::Confirm;
use tracing::warn;

/// Asks on the terminal. Prompts go to stderr so stdout stays clean for
/// `--json-output`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn keep_local(&self, path: &str, local: &str, remote: &str) -> bool {
        eprintln!("Conflict on {} (local vs remote):", path);
        eprint!("{}", format_text_diff(local, remote));
        Confirm::new()
            .with_prompt(format!("Keep the local version of {}?", path))
            .default(true)
            .interact()
            .unwrap_or_else(|e| {
                warn!(%path, error = %e, "No answer, keeping the local version");
                true
            })
    }

    fn confirm(&self, message: &str) -> bool {
        Confirm::new()
            .with_prompt(message)
            .default(true)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, "No answer, not applying");
                false
            })
    }
}
