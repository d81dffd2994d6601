//! Backend control markers
//!
//! The backend can disambiguate a reply with `[NAVIGATE:<target>]` or
//! `[FEATURE:<name>]`. Markers win over pattern matching and are stripped from
//! the text shown to the user.

use std::sync::LazyLock;

use regex::Regex;

/// Matches either marker kind
static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(NAVIGATE|FEATURE)\s*:\s*([^\]]*?)\s*\]").expect("valid regex")
});

/// A control marker found in reply text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Navigate to a path or named page
    Navigate(String),
    /// Run a named feature
    Feature(String),
}

/// First marker in `text`, if any
#[must_use]
pub fn find_marker(text: &str) -> Option<Marker> {
    MARKER_REGEX.captures_iter(text).find_map(|caps| {
        let target = caps.get(2)?.as_str().trim();
        if target.is_empty() {
            return None;
        }
        let kind = caps.get(1)?.as_str();
        if kind.eq_ignore_ascii_case("navigate") {
            Some(Marker::Navigate(target.to_string()))
        } else {
            Some(Marker::Feature(target.to_string()))
        }
    })
}

/// Remove all markers and collapse the whitespace they leave behind
#[must_use]
pub fn strip_markers(text: &str) -> String {
    let stripped = MARKER_REGEX.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_navigate_marker() {
        assert_eq!(
            find_marker("Sure, taking you there. [NAVIGATE:/deaf]"),
            Some(Marker::Navigate("/deaf".to_string()))
        );
        assert_eq!(
            find_marker("[navigate: topic explorer ] ok"),
            Some(Marker::Navigate("topic explorer".to_string()))
        );
    }

    #[test]
    fn finds_feature_marker() {
        assert_eq!(
            find_marker("Here is a quiz [FEATURE:quiz]"),
            Some(Marker::Feature("quiz".to_string()))
        );
    }

    #[test]
    fn first_marker_wins_and_empty_is_skipped() {
        assert_eq!(
            find_marker("[FEATURE:] [FEATURE:flashcards] [NAVIGATE:/sign]"),
            Some(Marker::Feature("flashcards".to_string()))
        );
        assert_eq!(find_marker("no markers here"), None);
    }

    #[test]
    fn strips_markers_from_reply() {
        assert_eq!(
            strip_markers("Opening the quiz [FEATURE:quiz] now."),
            "Opening the quiz now."
        );
        assert_eq!(strip_markers("[NAVIGATE:/deaf]"), "");
    }
}
