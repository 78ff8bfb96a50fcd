//! Per-poll bookkeeping and novelty detection

use crate::chat::ChatMessage;
use crate::normalizer::latest_assistant_content;

/// What the client had already seen when a poll was armed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollBaseline {
    /// Real (non-synthetic) turns displayed, including the user's own echo
    pub message_count: usize,
    /// Newest assistant content displayed, if any
    pub last_assistant_content: Option<String>,
}

/// Host visibility, as published by the lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// How a poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new assistant reply was found and the thread reconciled
    Resolved { cycles: u32 },
    /// The cycle cap was reached; placeholders were removed
    TimedOut { cycles: u32 },
    /// Cancelled by a thread switch or a newer poll
    Superseded,
}

/// Result of comparing a fetched snapshot with the bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// More turns *and* a different newest assistant turn
    Novel,
    /// More turns but the same newest assistant turn (e.g. the user's own
    /// message got persisted); bookkeeping advanced
    CountOnly,
    Unchanged,
}

/// Live state of one poll; built fresh on every `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub thread_id: String,
    pub last_message_count: usize,
    pub last_assistant_content: Option<String>,
}

impl PollState {
    pub fn new(thread_id: impl Into<String>, baseline: PollBaseline) -> Self {
        Self {
            thread_id: thread_id.into(),
            last_message_count: baseline.message_count,
            last_assistant_content: baseline.last_assistant_content,
        }
    }

    /// Compare a normalized snapshot against what was last seen.
    pub fn observe(&mut self, snapshot: &[ChatMessage]) -> Observation {
        let count = snapshot.len();
        let latest = latest_assistant_content(snapshot);

        let grew = count > self.last_message_count;
        let differs = latest != self.last_assistant_content.as_deref();

        match (grew, differs) {
            (true, true) => Observation::Novel,
            (true, false) => {
                self.last_message_count = count;
                self.last_assistant_content = latest.map(str::to_string);
                Observation::CountOnly
            }
            _ => Observation::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(c: &str) -> ChatMessage {
        ChatMessage::user(c, None)
    }

    fn ai(c: &str) -> ChatMessage {
        ChatMessage::assistant(c, None)
    }

    fn fresh() -> PollState {
        PollState::new(
            "t-1",
            PollBaseline {
                message_count: 1,
                last_assistant_content: None,
            },
        )
    }

    #[test]
    fn test_user_echo_persisted_is_not_novel() {
        let mut state = fresh();
        assert_eq!(state.observe(&[user("Hello")]), Observation::Unchanged);
    }

    #[test]
    fn test_reply_is_novel() {
        let mut state = fresh();
        assert_eq!(
            state.observe(&[user("Hello"), ai("Hi there")]),
            Observation::Novel
        );
    }

    #[test]
    fn test_count_growth_with_same_reply_is_not_novel() {
        let mut state = PollState::new(
            "t-1",
            PollBaseline {
                message_count: 3,
                last_assistant_content: Some("Old answer".into()),
            },
        );
        let snapshot = [user("q1"), ai("Old answer"), user("q2"), user("q2 again")];
        assert_eq!(state.observe(&snapshot), Observation::CountOnly);
        assert_eq!(state.last_message_count, 4);
        assert_eq!(state.last_assistant_content.as_deref(), Some("Old answer"));

        // Same snapshot again: nothing new
        assert_eq!(state.observe(&snapshot), Observation::Unchanged);
    }

    #[test]
    fn test_different_reply_without_growth_is_not_novel() {
        let mut state = PollState::new(
            "t-1",
            PollBaseline {
                message_count: 2,
                last_assistant_content: Some("a".into()),
            },
        );
        assert_eq!(state.observe(&[user("q"), ai("b")]), Observation::Unchanged);
    }
}
