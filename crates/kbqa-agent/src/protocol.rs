//! Per-run tool-order protocol state.
//!
//! A `ProtocolState` is created for each question and threaded `&mut` through
//! every tool call. It answers two questions:
//!
//! - was this entity id returned by entity search during this run? (property
//!   fetch refuses anything else, so the model cannot invent identifiers)
//! - has query escalation been attempted during this run? (article fallback
//!   is gated on it)

use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on the number of ids echoed back in protocol-violation hints.
pub const AUTHORIZED_SAMPLE_LIMIT: usize = 15;

/// Trim + uppercase, then require `Q` followed by one or more ASCII digits.
pub fn normalize_entity_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_ascii_uppercase();
    let digits = id.strip_prefix('Q')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolState {
    authorized: BTreeSet<String>,
    origins: BTreeMap<String, String>,
    escalation_attempted: bool,
}

impl ProtocolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything from the previous question.
    pub fn reset(&mut self) {
        self.authorized.clear();
        self.origins.clear();
        self.escalation_attempted = false;
    }

    /// Authorize the well-formed ids among `ids`; malformed ones are dropped.
    /// Returns the normalized ids that were registered.
    pub fn register<I, S>(&mut self, entity_name: &str, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registered = Vec::new();
        for raw in ids {
            let Some(id) = normalize_entity_id(raw.as_ref()) else {
                continue;
            };
            self.origins
                .entry(id.clone())
                .or_insert_with(|| entity_name.trim().to_string());
            self.authorized.insert(id.clone());
            registered.push(id);
        }
        registered
    }

    pub fn is_authorized(&self, id: &str) -> bool {
        normalize_entity_id(id).is_some_and(|id| self.authorized.contains(&id))
    }

    /// Sorted, bounded list of authorized ids for error hints.
    pub fn authorized_sample(&self, limit: usize) -> Vec<String> {
        self.authorized.iter().take(limit.max(1)).cloned().collect()
    }

    /// Entity name whose search first produced `id` (diagnostics only).
    pub fn origin_of(&self, id: &str) -> Option<&str> {
        let id = normalize_entity_id(id)?;
        self.origins.get(&id).map(String::as_str)
    }

    pub fn authorized_count(&self) -> usize {
        self.authorized.len()
    }

    pub fn mark_escalation_attempt(&mut self) {
        self.escalation_attempted = true;
    }

    pub fn has_escalation_attempt(&self) -> bool {
        self.escalation_attempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_validates_ids() {
        assert_eq!(normalize_entity_id(" q142 ").as_deref(), Some("Q142"));
        assert_eq!(normalize_entity_id("Q1").as_deref(), Some("Q1"));
        assert_eq!(normalize_entity_id("Q"), None);
        assert_eq!(normalize_entity_id("P31"), None);
        assert_eq!(normalize_entity_id("Q14a"), None);
        assert_eq!(normalize_entity_id("Q-1"), None);
        assert_eq!(normalize_entity_id("France"), None);
    }

    #[test]
    fn register_drops_malformed_ids_and_tracks_origin() {
        let mut state = ProtocolState::new();
        let registered = state.register("France", ["Q142", "not-an-id", " q90 "]);
        assert_eq!(registered, vec!["Q142".to_string(), "Q90".to_string()]);
        assert!(state.is_authorized("q142"));
        assert!(state.is_authorized("Q90"));
        assert!(!state.is_authorized("not-an-id"));
        assert_eq!(state.origin_of("Q90"), Some("France"));
        assert_eq!(state.authorized_count(), 2);
    }

    #[test]
    fn first_origin_wins() {
        let mut state = ProtocolState::new();
        state.register("Paris", ["Q90"]);
        state.register("Paris, France", ["Q90"]);
        assert_eq!(state.origin_of("Q90"), Some("Paris"));
    }

    #[test]
    fn reset_clears_ids_and_escalation_flag() {
        let mut state = ProtocolState::new();
        state.register("Albert Einstein", ["Q937"]);
        state.mark_escalation_attempt();
        assert!(state.has_escalation_attempt());

        state.reset();
        assert!(!state.is_authorized("Q937"));
        assert!(!state.has_escalation_attempt());
        assert_eq!(state.origin_of("Q937"), None);
    }

    #[test]
    fn sample_is_sorted_and_bounded() {
        let mut state = ProtocolState::new();
        state.register("x", ["Q3", "Q1", "Q2"]);
        assert_eq!(state.authorized_sample(2), vec!["Q1", "Q2"]);
        assert_eq!(state.authorized_sample(0), vec!["Q1"]);
    }
}
