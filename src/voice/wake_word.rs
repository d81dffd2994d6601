//! Wake word detection
//!
//! Watches recognition transcripts for the trigger token. Both the latest
//! partial result and the cumulative transcript of the current recognition
//! turn are checked, so a trigger split across results still fires.

use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for the wake word
    Idle,
    /// Wake word seen this turn; further results are ignored
    Activated,
}

/// Detects the wake word in recognition transcripts
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_word: String,
    state: DetectorState,
    /// Final results received this turn
    finals: String,
    /// Latest partial result of the utterance in progress
    partial: String,
    /// Transcript that contained the wake word
    trigger_transcript: Option<String>,
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// # Errors
    ///
    /// Returns error if the wake word is empty after trimming
    pub fn new(wake_word: &str) -> Result<Self> {
        let normalized = wake_word.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }

        tracing::debug!(wake_word = %normalized, "wake word detector initialized");

        Ok(Self {
            wake_word: normalized,
            state: DetectorState::Idle,
            finals: String::new(),
            partial: String::new(),
            trigger_transcript: None,
        })
    }

    /// Feed an interim result; returns `true` exactly once per turn when the
    /// wake word first appears
    pub fn observe_partial(&mut self, text: &str) -> bool {
        if self.is_activated() {
            return false;
        }

        self.partial.clear();
        self.partial.push_str(text);
        self.check(text)
    }

    /// Feed a final result; returns `true` exactly once per turn when the
    /// wake word first appears
    pub fn observe_final(&mut self, text: &str) -> bool {
        if self.is_activated() {
            return false;
        }

        self.partial.clear();
        if !self.finals.is_empty() && !self.finals.ends_with(' ') && !text.starts_with(' ') {
            self.finals.push(' ');
        }
        self.finals.push_str(text);
        self.check(text)
    }

    fn check(&mut self, latest: &str) -> bool {
        let cumulative = self.cumulative();
        let hit = contains_token(latest, &self.wake_word) || contains_token(&cumulative, &self.wake_word);

        if hit {
            tracing::info!(wake_word = %self.wake_word, transcript = %cumulative, "wake word detected");
            self.state = DetectorState::Activated;
            self.trigger_transcript = Some(cumulative);
        }

        hit
    }

    /// Cumulative transcript of the current turn
    #[must_use]
    pub fn cumulative(&self) -> String {
        match (self.finals.is_empty(), self.partial.is_empty()) {
            (true, _) => self.partial.clone(),
            (false, true) => self.finals.clone(),
            (false, false) => format!("{} {}", self.finals.trim_end(), self.partial),
        }
    }

    /// Transcript that triggered activation, if any
    #[must_use]
    pub fn trigger_transcript(&self) -> Option<&str> {
        self.trigger_transcript.as_deref()
    }

    /// Text spoken after the wake word in the triggering transcript
    #[must_use]
    pub fn command_hint(&self) -> Option<String> {
        self.trigger_transcript
            .as_deref()
            .map(|t| extract_command(t, &self.wake_word))
    }

    /// Check if the wake word fired this turn
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.state == DetectorState::Activated
    }

    /// Start a new recognition turn
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.finals.clear();
        self.partial.clear();
        self.trigger_transcript = None;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    /// Get the configured wake word
    #[must_use]
    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }
}

/// Case-insensitive substring match
fn contains_token(text: &str, token: &str) -> bool {
    text.to_lowercase().contains(token)
}

/// Case-insensitive pattern for the literal wake word
fn wake_pattern(wake_word: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(wake_word.trim()))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Extract the command after the wake word
///
/// Falls back to the whole transcript when the wake word is absent. The cut
/// is made at the end of the last match in the original text, so it always
/// lands on a character boundary whatever the casing rules do to lengths.
#[must_use]
pub fn extract_command(transcript: &str, wake_word: &str) -> String {
    let last = wake_pattern(wake_word).and_then(|pattern| pattern.find_iter(transcript).last());

    match last {
        Some(found) => trim_separators(&transcript[found.end()..]).to_string(),
        None => transcript.trim().to_string(),
    }
}

fn trim_separators(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
        .trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_word_detection() {
        let mut detector = WakeWordDetector::new("jarvis").unwrap();

        assert!(!detector.observe_final("hello world"));
        assert_eq!(detector.state(), DetectorState::Idle);

        assert!(detector.observe_partial("Hey Jarvis, what's up?"));
        assert_eq!(detector.state(), DetectorState::Activated);
    }

    #[test]
    fn fires_once_per_turn() {
        let mut detector = WakeWordDetector::new("jarvis").unwrap();

        assert!(detector.observe_partial("hello jarvis"));
        assert!(!detector.observe_partial("hello jarvis please"));
        assert!(!detector.observe_final("hello jarvis please"));

        detector.reset();
        assert!(detector.observe_final("jarvis"));
    }

    #[test]
    fn trigger_split_across_results() {
        let mut detector = WakeWordDetector::new("jarvis").unwrap();

        assert!(!detector.observe_final("ok jar"));
        // separate words never join into the token
        assert!(!detector.observe_partial("vis"));

        let mut detector = WakeWordDetector::new("hey jarvis").unwrap();
        assert!(!detector.observe_final("hey"));
        assert!(detector.observe_partial("jarvis open the quiz"));
        assert_eq!(detector.trigger_transcript(), Some("hey jarvis open the quiz"));
    }

    #[test]
    fn normalizes_wake_word() {
        let detector = WakeWordDetector::new("  JARVIS ").unwrap();
        assert_eq!(detector.wake_word(), "jarvis");
        assert!(WakeWordDetector::new("   ").is_err());
    }

    #[test]
    fn command_hint_after_wake_word() {
        let mut detector = WakeWordDetector::new("jarvis").unwrap();
        detector.observe_partial("Jarvis, go to the deaf page");
        assert_eq!(detector.command_hint().as_deref(), Some("go to the deaf page"));
    }

    #[test]
    fn test_extract_command() {
        assert_eq!(extract_command("Hey Jarvis, what's the weather?", "jarvis"), "what's the weather?");
        assert_eq!(extract_command("Jarvis", "jarvis"), "");
        assert_eq!(extract_command("open the quiz", "jarvis"), "open the quiz");
    }

    #[test]
    fn extract_command_with_mixed_width_case_folding() {
        // 'Ⱥ' grows when lowercased and 'Ω' shrinks, so byte offsets of the
        // lowercased text do not map back onto the original
        assert_eq!(extract_command("ȺjarvisΩ open", "jarvis"), "Ω open");
        assert_eq!(extract_command("ȺJARVIS, öffne das Quiz", "jarvis"), "öffne das Quiz");
        assert_eq!(extract_command("İstanbul jarvis go home", "Jarvis"), "go home");
    }

    #[test]
    fn command_hint_survives_unicode_transcript() {
        let mut detector = WakeWordDetector::new("jarvis").unwrap();
        assert!(detector.observe_final("ȺjarvisΩ open the quiz"));
        assert_eq!(detector.command_hint().as_deref(), Some("Ω open the quiz"));
    }
}
