//! Intent dispatch over the rule table

use super::markers::{Marker, find_marker};
use super::table::{IntentTable, NavigationRoute};
use super::{ActionResult, FeatureAction, IntentAction, MatchSource};
use crate::Result;

/// Matches commands against an [`IntentTable`]
///
/// Dispatch is a pure function of its inputs and the table: the same text
/// always yields the same action.
#[derive(Debug, Clone)]
pub struct IntentDispatcher {
    table: IntentTable,
}

impl IntentDispatcher {
    /// Dispatcher over `table`
    #[must_use]
    pub const fn new(table: IntentTable) -> Self {
        Self { table }
    }

    /// Dispatcher over the built-in table plus `routes`
    ///
    /// # Errors
    ///
    /// Returns error if a route cannot be compiled into a rule
    pub fn with_routes(routes: &[NavigationRoute]) -> Result<Self> {
        Ok(Self::new(IntentTable::with_routes(routes)?))
    }

    /// Underlying table
    #[must_use]
    pub const fn table(&self) -> &IntentTable {
        &self.table
    }

    /// Find the action for a command
    ///
    /// A control marker in `assistant_text` wins. Otherwise `user_text` is
    /// checked against the shortlist, then the full table; the first match
    /// wins.
    #[must_use]
    pub fn dispatch(&self, user_text: &str, assistant_text: &str) -> Option<ActionResult> {
        if let Some(result) = self.dispatch_marker(assistant_text) {
            return Some(result);
        }

        let text = user_text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(rule) = self.table.shortlist().find(|rule| rule.matches(text)) {
            tracing::debug!(rule = rule.name(), "intent matched shortlist");
            return Some(result(rule.action().clone(), MatchSource::Shortlist));
        }

        let (_, rule) = self
            .table
            .rules()
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.table.is_shortlisted(*index))
            .find(|(_, rule)| rule.matches(text))?;

        tracing::debug!(rule = rule.name(), "intent matched table");
        Some(result(rule.action().clone(), MatchSource::Table))
    }

    /// Local dispatch used when the backend is unavailable
    #[must_use]
    pub fn fallback(&self, transcript: &str) -> Option<ActionResult> {
        let result = self.dispatch(transcript, "");
        tracing::info!(
            transcript,
            action = ?result.as_ref().map(|r| &r.action),
            "fallback dispatch"
        );
        result
    }

    fn dispatch_marker(&self, assistant_text: &str) -> Option<ActionResult> {
        let action = match find_marker(assistant_text)? {
            Marker::Navigate(target) => {
                if let Some(route) = self.table.route_for(&target) {
                    route.action()
                } else if target.starts_with('/') {
                    IntentAction::Navigate {
                        label: target.trim_start_matches('/').to_string(),
                        path: target,
                    }
                } else {
                    tracing::warn!(target = %target, "navigation marker names unknown page");
                    return None;
                }
            }
            Marker::Feature(name) => {
                let Some(feature) = FeatureAction::from_name(&name) else {
                    tracing::warn!(feature = %name, "feature marker names unknown feature");
                    return None;
                };
                IntentAction::Feature(feature)
            }
        };

        tracing::debug!(?action, "intent matched marker");
        Some(result(action, MatchSource::Marker))
    }
}

fn result(action: IntentAction, source: MatchSource) -> ActionResult {
    ActionResult {
        reply: action.reply(),
        action,
        source,
    }
}
