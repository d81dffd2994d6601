//! Ordered intent rule table

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FeatureAction, IntentAction};
use crate::{Error, Result};

/// Words that turn a page name into a navigation request
static NAVIGATION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:navigate|go\s+to|open|take\s+me\s+to|show\s+me)\b").expect("valid regex")
});

/// Whether `text` contains a navigation verb
#[must_use]
pub fn has_navigation_verb(text: &str) -> bool {
    NAVIGATION_VERB.is_match(text)
}

/// A page the assistant can navigate to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationRoute {
    /// Words that name the page
    pub keywords: Vec<String>,
    /// Route path handed to the application shell
    pub path: String,
    /// Display name
    pub label: String,
}

impl NavigationRoute {
    fn new(keywords: &[&str], path: &str, label: &str) -> Self {
        Self {
            keywords: keywords.iter().map(ToString::to_string).collect(),
            path: path.to_string(),
            label: label.to_string(),
        }
    }

    /// Navigation action for this route
    #[must_use]
    pub fn action(&self) -> IntentAction {
        IntentAction::Navigate {
            path: self.path.clone(),
            label: self.label.clone(),
        }
    }
}

/// Built-in pages, most specific keywords first
#[must_use]
pub fn default_routes() -> Vec<NavigationRoute> {
    vec![
        NavigationRoute::new(&["deaf assistance", "deaf", "hearing", "def", "death"], "/deaf", "Deaf Assistance"),
        NavigationRoute::new(&["blind assistance", "blind", "visual"], "/voice-assistant", "Blind Assistance"),
        NavigationRoute::new(&["home", "homepage", "main page", "home page"], "/features", "Home Page"),
        NavigationRoute::new(&["topic explorer", "explorer", "topics"], "/topic-explorer", "Topic Explorer"),
        NavigationRoute::new(&["speech fluency", "speech", "fluency"], "/speech", "Speech Fluency"),
        NavigationRoute::new(&["summary page", "summary", "summarizer"], "/summary", "Summary"),
        NavigationRoute::new(&["sign language", "sign"], "/sign", "Sign Language"),
        NavigationRoute::new(&["profile", "my account", "account"], "/Profile", "Profile"),
    ]
}

/// Rule names tried before the full scan
pub const DEFAULT_SHORTLIST: [&str; 3] = ["navigate:home", "navigate:deaf", "navigate:blind"];

/// Extra condition a rule needs besides its keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGuard {
    /// Keywords alone are enough
    Always,
    /// Text must also contain a navigation verb
    NavigationVerb,
}

/// One `{patterns, action}` entry
#[derive(Debug, Clone)]
pub struct IntentRule {
    name: String,
    pattern: Regex,
    guard: RuleGuard,
    action: IntentAction,
}

impl IntentRule {
    /// Compile a rule matching any of `keywords` on word boundaries
    ///
    /// # Errors
    ///
    /// Returns error if `keywords` is empty or the pattern cannot compile
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        keywords: &[S],
        guard: RuleGuard,
        action: IntentAction,
    ) -> Result<Self> {
        let name = name.into();
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                k.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();

        if alternatives.is_empty() {
            return Err(Error::Config(format!("intent rule {name} has no keywords")));
        }

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|e| Error::Config(format!("intent rule {name}: {e}")))?;

        Ok(Self {
            name,
            pattern,
            guard,
            action,
        })
    }

    /// Rule name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action taken on match
    #[must_use]
    pub const fn action(&self) -> &IntentAction {
        &self.action
    }

    /// Whether the rule fires on `text`
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let guard_ok = match self.guard {
            RuleGuard::Always => true,
            RuleGuard::NavigationVerb => has_navigation_verb(text),
        };
        guard_ok && self.pattern.is_match(text)
    }
}

/// Ordered rule table plus the shortlist checked first
#[derive(Debug, Clone)]
pub struct IntentTable {
    rules: Vec<IntentRule>,
    shortlist: Vec<usize>,
    routes: Vec<NavigationRoute>,
}

impl IntentTable {
    /// Built-in table
    ///
    /// # Errors
    ///
    /// Returns error if a rule fails to compile
    pub fn builtin() -> Result<Self> {
        Self::with_routes(&[])
    }

    /// Built-in table with extra navigation routes
    ///
    /// Extra routes are checked after the built-in ones, so they cannot shadow
    /// a built-in page.
    ///
    /// # Errors
    ///
    /// Returns error if a route has no keywords
    pub fn with_routes(extra: &[NavigationRoute]) -> Result<Self> {
        let mut routes = default_routes();
        routes.extend(extra.iter().cloned());

        let mut rules = Vec::new();
        for route in &routes {
            let slug = route
                .label
                .split_whitespace()
                .next()
                .unwrap_or(&route.path)
                .to_lowercase();
            rules.push(IntentRule::new(
                format!("navigate:{slug}"),
                route.keywords.as_slice(),
                RuleGuard::NavigationVerb,
                route.action(),
            )?);
        }

        for (feature, keywords) in feature_keywords() {
            rules.push(IntentRule::new(
                format!("feature:{feature}"),
                keywords,
                RuleGuard::Always,
                IntentAction::Feature(feature),
            )?);
        }

        rules.push(IntentRule::new("close", &["close", "minimize", "minimise"], RuleGuard::Always, IntentAction::Close)?);
        rules.push(IntentRule::new(
            "greet",
            &["hello", "hi", "hey", "good morning", "good evening"],
            RuleGuard::Always,
            IntentAction::Greet,
        )?);
        rules.push(IntentRule::new(
            "help",
            &["help", "what can you do"],
            RuleGuard::Always,
            IntentAction::Help,
        )?);
        rules.push(IntentRule::new(
            "navigate:unknown",
            &["navigate", "go to", "open", "take me to", "show me"],
            RuleGuard::Always,
            IntentAction::UnknownDestination,
        )?);

        let mut table = Self {
            rules,
            shortlist: Vec::new(),
            routes,
        };
        table.set_shortlist(&DEFAULT_SHORTLIST);

        tracing::debug!(rules = table.rules.len(), routes = table.routes.len(), "intent table loaded");
        Ok(table)
    }

    /// Replace the shortlist; unknown rule names are ignored
    pub fn set_shortlist<S: AsRef<str>>(&mut self, names: &[S]) {
        self.shortlist = names
            .iter()
            .filter_map(|name| {
                let index = self.rules.iter().position(|r| r.name == name.as_ref());
                if index.is_none() {
                    tracing::warn!(rule = name.as_ref(), "unknown shortlist rule, skipping");
                }
                index
            })
            .collect();
    }

    /// All rules in scan order
    #[must_use]
    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    /// Shortlisted rules in check order
    pub fn shortlist(&self) -> impl Iterator<Item = &IntentRule> {
        self.shortlist.iter().filter_map(|&i| self.rules.get(i))
    }

    /// Whether rule `index` is on the shortlist
    #[must_use]
    pub fn is_shortlisted(&self, index: usize) -> bool {
        self.shortlist.contains(&index)
    }

    /// Known pages
    #[must_use]
    pub fn routes(&self) -> &[NavigationRoute] {
        &self.routes
    }

    /// Find a page by path, label or keyword
    #[must_use]
    pub fn route_for(&self, target: &str) -> Option<&NavigationRoute> {
        let target = target.trim();
        if target.starts_with('/') {
            return self.routes.iter().find(|r| r.path.eq_ignore_ascii_case(target));
        }

        let lower = target.to_lowercase();
        self.routes.iter().find(|r| {
            r.label.to_lowercase() == lower || r.keywords.iter().any(|k| k.to_lowercase() == lower)
        })
    }
}

fn feature_keywords() -> [(FeatureAction, &'static [&'static str]); 6] {
    [
        (FeatureAction::Summarize, &["summarize", "summarise", "summarization", "summary of"]),
        (FeatureAction::Quiz, &["quiz", "mcq", "mcqs", "multiple choice"]),
        (FeatureAction::Flashcards, &["flashcard", "flashcards", "flash card", "flash cards"]),
        (
            FeatureAction::SignAnimation,
            &["sign language animation", "sign animation", "animate", "animation"],
        ),
        (FeatureAction::UploadDocument, &["upload", "upload a document", "upload document"]),
        (FeatureAction::SearchTopic, &["search for", "search", "look up"]),
    ]
}
