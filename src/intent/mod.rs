//! Command intent dispatch
//!
//! Maps what the user said (and what the backend replied) to a navigation or
//! feature action. The same dispatcher runs on backend replies and, when the
//! backend is unavailable, directly on the local transcript.

mod dispatcher;
mod markers;
mod table;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dispatcher::IntentDispatcher;
pub use markers::{Marker, find_marker, strip_markers};
pub use table::{IntentRule, IntentTable, NavigationRoute, RuleGuard};

/// Local feature the application shell can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureAction {
    /// Summarize the open document
    Summarize,
    /// Generate a multiple-choice quiz
    Quiz,
    /// Generate flashcards
    Flashcards,
    /// Play the sign-language animation
    SignAnimation,
    /// Open the document upload dialog
    UploadDocument,
    /// Search for a topic
    SearchTopic,
}

impl FeatureAction {
    /// Every feature, in table order
    pub const ALL: [Self; 6] = [
        Self::Summarize,
        Self::Quiz,
        Self::Flashcards,
        Self::SignAnimation,
        Self::UploadDocument,
        Self::SearchTopic,
    ];

    /// Canonical marker name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Quiz => "quiz",
            Self::Flashcards => "flashcards",
            Self::SignAnimation => "sign-animation",
            Self::UploadDocument => "upload-document",
            Self::SearchTopic => "search-topic",
        }
    }

    /// Parse a marker name, tolerating case, spacing and a few aliases
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        match normalized.as_str() {
            "summarize" | "summarise" | "summary" => Some(Self::Summarize),
            "quiz" | "mcq" => Some(Self::Quiz),
            "flashcards" | "flashcard" => Some(Self::Flashcards),
            "sign-animation" | "sign-language" | "animation" => Some(Self::SignAnimation),
            "upload-document" | "upload" => Some(Self::UploadDocument),
            "search-topic" | "search" => Some(Self::SearchTopic),
            _ => None,
        }
    }

    /// Human-readable name
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Summarize => "the summary",
            Self::Quiz => "a quiz",
            Self::Flashcards => "flashcards",
            Self::SignAnimation => "the sign language animation",
            Self::UploadDocument => "document upload",
            Self::SearchTopic => "topic search",
        }
    }
}

impl fmt::Display for FeatureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a matched command asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    /// Change page
    Navigate {
        /// Route path
        path: String,
        /// Display name of the page
        label: String,
    },
    /// Run a local feature
    Feature(FeatureAction),
    /// Close the assistant panel
    Close,
    /// Say hello
    Greet,
    /// Explain what the assistant can do
    Help,
    /// A navigation verb without a known destination
    UnknownDestination,
}

impl IntentAction {
    /// Canned reply for this action
    #[must_use]
    pub fn reply(&self) -> String {
        match self {
            Self::Navigate { label, .. } => format!("Okay, navigating to {label} now."),
            Self::Feature(feature) => format!("Starting {}.", feature.label()),
            Self::Close => "Closing the assistant.".to_string(),
            Self::Greet => "Hello! I'm here to help you navigate through the platform.".to_string(),
            Self::Help => {
                "I can help you navigate to different pages. Just say \"navigate to\" followed by the page name."
                    .to_string()
            }
            Self::UnknownDestination => {
                "I'm not sure which page you want to navigate to. Could you be more specific?".to_string()
            }
        }
    }
}

/// A dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// What to do
    pub action: IntentAction,
    /// What to say about it
    pub reply: String,
    /// How the action was found
    pub source: MatchSource,
}

/// How a dispatch matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// Explicit control marker in the assistant reply
    Marker,
    /// Rule from the fast shortlist
    Shortlist,
    /// Rule found by the full table scan
    Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_names_roundtrip() {
        for feature in FeatureAction::ALL {
            assert_eq!(FeatureAction::from_name(feature.name()), Some(feature));
        }
        assert_eq!(FeatureAction::from_name(" Sign_Language "), Some(FeatureAction::SignAnimation));
        assert_eq!(FeatureAction::from_name("teleport"), None);
    }

    #[test]
    fn navigation_reply_names_page() {
        let action = IntentAction::Navigate {
            path: "/deaf".to_string(),
            label: "Deaf Assistance".to_string(),
        };
        assert_eq!(action.reply(), "Okay, navigating to Deaf Assistance now.");
    }
}
