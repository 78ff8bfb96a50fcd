//! Content normalizer
//!
//! Turns the raw conversation history returned by the backend into the
//! canonical turns shown to the user:
//! - role labels from mixed vocabularies are mapped to [`Role`](crate::chat::Role)
//! - tool-call echoes, raw retrieval payloads and empty turns are dropped
//! - leaked prompt markers and trailing instruction blocks are stripped
//! - adjacent identical turns collapse to one
//!
//! Normalization is idempotent: feeding the output back in yields the same
//! output. Rules are pluggable ([`NormalizeRule`]) so new heuristics don't
//! touch the scheduler.

pub mod rules;

use crate::backend::RawMessage;
use crate::chat::{ChatMessage, Role};
pub use rules::{default_rules, NormalizeRule};
use tracing::trace;

/// Ordered rule chain applied to every turn
pub struct Normalizer {
    rules: Vec<Box<dyn NormalizeRule>>,
}

impl Normalizer {
    /// Normalizer with the built-in rule chain
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Normalizer with a custom rule chain (applied in order)
    pub fn with_rules(rules: Vec<Box<dyn NormalizeRule>>) -> Self {
        Self { rules }
    }

    /// Append a rule at the end of the chain
    pub fn push_rule(&mut self, rule: Box<dyn NormalizeRule>) {
        self.rules.push(rule);
    }

    /// Map one raw backend turn to a canonical turn, or `None` if dropped.
    pub fn normalize_turn(&self, raw: &RawMessage, thread_id: Option<&str>) -> Option<ChatMessage> {
        let Some(role) = Role::from_label(&raw.role) else {
            trace!(role = %raw.role, "Dropping turn with unknown role");
            return None;
        };
        let turn = ChatMessage::new(role, raw.content.clone(), thread_id.map(str::to_string));
        self.apply_rules(turn)
    }

    /// Normalize a full raw history into the authoritative snapshot.
    pub fn normalize(&self, raw: &[RawMessage], thread_id: Option<&str>) -> Vec<ChatMessage> {
        let turns = raw
            .iter()
            .filter_map(|m| self.normalize_turn(m, thread_id))
            .collect();
        collapse_adjacent_duplicates(turns)
    }

    /// Re-normalize already canonical turns.
    pub fn normalize_messages(&self, turns: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let turns = turns
            .into_iter()
            .filter_map(|t| self.apply_rules(t))
            .collect();
        collapse_adjacent_duplicates(turns)
    }

    fn apply_rules(&self, turn: ChatMessage) -> Option<ChatMessage> {
        self.rules.iter().try_fold(turn, |turn, rule| {
            let out = rule.apply(turn);
            if out.is_none() {
                trace!(rule = rule.name(), "Turn dropped by normalizer");
            }
            out
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Content of the newest assistant turn in a normalized snapshot
pub fn latest_assistant_content(turns: &[ChatMessage]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::Assistant && !t.is_synthetic())
        .map(|t| t.content.as_str())
}

/// Collapse runs of adjacent turns with the same role and content
pub fn collapse_adjacent_duplicates(mut turns: Vec<ChatMessage>) -> Vec<ChatMessage> {
    turns.dedup_by(|b, a| a.role == b.role && a.content == b.content);
    turns
}
