//! Application shell collaborator
//!
//! The shell owns pages, features and whatever the user sees. The session
//! only asks it to do things; it never waits on the answer.

use crate::intent::FeatureAction;
use crate::session::{ConversationEntry, Notice, Role};

/// Navigation, feature and notice sink for the session runtime
pub trait Shell {
    /// Change page
    fn navigate(&mut self, path: &str);

    /// Run a local feature
    fn perform(&mut self, feature: FeatureAction);

    /// Close the assistant panel
    fn close(&mut self);

    /// Show a status message
    fn notify(&mut self, notice: &Notice);

    /// Show a new conversation entry
    fn show(&mut self, entry: &ConversationEntry) {
        let _ = entry;
    }
}

/// Shell for the terminal: prints the conversation, logs requests
#[derive(Debug, Default)]
pub struct ConsoleShell {
    quiet: bool,
}

impl ConsoleShell {
    /// Create a console shell
    #[must_use]
    pub const fn new() -> Self {
        Self { quiet: false }
    }

    /// Log only; print nothing
    #[must_use]
    pub const fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl Shell for ConsoleShell {
    fn navigate(&mut self, path: &str) {
        tracing::info!(path, "navigate");
        if !self.quiet {
            println!("-> {path}");
        }
    }

    fn perform(&mut self, feature: FeatureAction) {
        tracing::info!(%feature, "perform feature");
        if !self.quiet {
            println!("-> feature: {feature}");
        }
    }

    fn close(&mut self) {
        tracing::info!("close assistant");
        if !self.quiet {
            println!("-> close");
        }
    }

    fn notify(&mut self, notice: &Notice) {
        tracing::info!(%notice, "notice");
        if !self.quiet {
            println!("[{notice}]");
        }
    }

    fn show(&mut self, entry: &ConversationEntry) {
        if self.quiet {
            return;
        }
        match entry.role {
            Role::User => println!("you: {}", entry.text),
            Role::Assistant => println!("jarvis: {}", entry.text),
        }
    }
}
