//! Built-in normalization rules
//!
//! Each rule either rewrites a turn or drops it. Rules run in order; every
//! rule is a fixpoint on its own output so the whole chain is idempotent.

use crate::chat::ChatMessage;
use regex::Regex;
use std::sync::LazyLock;

/// One step of the normalization chain.
pub trait NormalizeRule: Send + Sync {
    /// Short identifier used in trace logs
    fn name(&self) -> &'static str;

    /// Rewrite the turn, or return `None` to drop it.
    fn apply(&self, turn: ChatMessage) -> Option<ChatMessage>;
}

/// Markers leaked from prompt templates into stored turns
const PROMPT_MARKERS: &[&str] = &[
    "[INST]",
    "[/INST]",
    "<<SYS>>",
    "<</SYS>>",
    "<|im_start|>",
    "<|im_end|>",
];

/// Keys that only appear in retrieval/tool payloads, never in prose
const INTERNAL_KEYS: &[&str] = &["pageContent", "page_content", "metadata"];

static TOOL_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*calling\s+\S+\s+with\s+input").expect("valid tool-call regex")
});

static INSTRUCTION_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(system|instructions)[ \t]*:").expect("valid suffix regex")
});

/// Removes prompt-template markers and a trailing system-instruction block.
///
/// The suffix is cut from the first `System:` / `Instructions:` line that is
/// not the first line of the turn; a turn that *starts* with such a line is
/// left alone.
pub struct StripPromptFragments;

impl NormalizeRule for StripPromptFragments {
    fn name(&self) -> &'static str {
        "strip_prompt_fragments"
    }

    fn apply(&self, mut turn: ChatMessage) -> Option<ChatMessage> {
        let mut content = turn.content;

        // Removing one marker can splice two halves into another one.
        loop {
            let before = content.len();
            for marker in PROMPT_MARKERS {
                if content.contains(marker) {
                    content = content.replace(marker, "");
                }
            }
            if content.len() == before {
                break;
            }
        }

        if let Some(m) = INSTRUCTION_SUFFIX_RE
            .find_iter(&content)
            .find(|m| m.start() > 0)
        {
            content.truncate(m.start());
        }

        turn.content = content;
        Some(turn)
    }
}

/// Trims surrounding whitespace.
pub struct TrimWhitespace;

impl NormalizeRule for TrimWhitespace {
    fn name(&self) -> &'static str {
        "trim_whitespace"
    }

    fn apply(&self, mut turn: ChatMessage) -> Option<ChatMessage> {
        let trimmed = turn.content.trim();
        if trimmed.len() != turn.content.len() {
            turn.content = trimmed.to_string();
        }
        Some(turn)
    }
}

/// Drops turns with no visible content.
pub struct DropEmpty;

impl NormalizeRule for DropEmpty {
    fn name(&self) -> &'static str {
        "drop_empty"
    }

    fn apply(&self, turn: ChatMessage) -> Option<ChatMessage> {
        if turn.content.trim().is_empty() {
            None
        } else {
            Some(turn)
        }
    }
}

/// Drops agent tool-call echoes ("Calling search with input {...}").
pub struct DropToolCalls;

impl NormalizeRule for DropToolCalls {
    fn name(&self) -> &'static str {
        "drop_tool_calls"
    }

    fn apply(&self, turn: ChatMessage) -> Option<ChatMessage> {
        if TOOL_CALL_RE.is_match(&turn.content) {
            None
        } else {
            Some(turn)
        }
    }
}

/// Drops raw JSON payloads that carry retrieval/tool internals.
pub struct DropStructuredBlobs;

impl DropStructuredBlobs {
    fn has_internal_key(value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::Object(map) => {
                INTERNAL_KEYS.iter().any(|k| map.contains_key(*k))
                    || map.values().any(Self::has_internal_key)
            }
            serde_json::Value::Array(items) => items.iter().any(Self::has_internal_key),
            _ => false,
        }
    }
}

impl NormalizeRule for DropStructuredBlobs {
    fn name(&self) -> &'static str {
        "drop_structured_blobs"
    }

    fn apply(&self, turn: ChatMessage) -> Option<ChatMessage> {
        let trimmed = turn.content.trim_start();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Some(turn);
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if Self::has_internal_key(&value) => None,
            _ => Some(turn),
        }
    }
}

/// The default chain, in application order.
pub fn default_rules() -> Vec<Box<dyn NormalizeRule>> {
    vec![
        Box::new(StripPromptFragments),
        Box::new(TrimWhitespace),
        Box::new(DropEmpty),
        Box::new(DropToolCalls),
        Box::new(DropStructuredBlobs),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(content: &str) -> ChatMessage {
        ChatMessage::assistant(content, None)
    }

    #[test]
    fn test_strip_markers() {
        let out = StripPromptFragments
            .apply(ai("[INST]What is our CTR?[/INST]"))
            .unwrap();
        assert_eq!(out.content, "What is our CTR?");
    }

    #[test]
    fn test_strip_spliced_marker() {
        let out = StripPromptFragments.apply(ai("a[IN[INST]ST]b")).unwrap();
        assert_eq!(out.content, "ab");
    }

    #[test]
    fn test_strip_trailing_instruction_suffix() {
        let out = StripPromptFragments
            .apply(ai("Your CTR is 3.2%.\n\nSystem: always answer in English"))
            .unwrap();
        assert_eq!(out.content.trim(), "Your CTR is 3.2%.");
    }

    #[test]
    fn test_leading_instruction_line_kept() {
        let out = StripPromptFragments
            .apply(ai("Instructions: open the report\nthen export"))
            .unwrap();
        assert_eq!(out.content, "Instructions: open the report\nthen export");
    }

    #[test]
    fn test_drop_tool_call() {
        assert!(DropToolCalls
            .apply(ai("Calling search_leads with input {\"q\": \"acme\"}"))
            .is_none());
        assert!(DropToolCalls
            .apply(ai("  calling get_campaigns with input {}"))
            .is_none());
        assert!(DropToolCalls
            .apply(ai("I am calling you back with input from sales"))
            .is_some());
    }

    #[test]
    fn test_drop_structured_blob_with_internal_key() {
        assert!(DropStructuredBlobs
            .apply(ai(r#"{"pageContent": "raw chunk", "metadata": {"source": "kb"}}"#))
            .is_none());
        assert!(DropStructuredBlobs
            .apply(ai(r#"[{"page_content": "chunk"}]"#))
            .is_none());
    }

    #[test]
    fn test_keep_plain_json_and_prose() {
        assert!(DropStructuredBlobs
            .apply(ai(r#"{"revenue": 1200}"#))
            .is_some());
        assert!(DropStructuredBlobs
            .apply(ai("{not json but mentions metadata}"))
            .is_some());
        assert!(DropStructuredBlobs.apply(ai("metadata is useful")).is_some());
    }

    #[test]
    fn test_drop_empty() {
        assert!(DropEmpty.apply(ai("   \n\t")).is_none());
        assert!(DropEmpty.apply(ai("ok")).is_some());
    }
}
