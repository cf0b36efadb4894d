//! Extract an action batch from an assistant reply.
//!
//! Precedence: the first ```` ```json ```` fenced block, else the whole reply
//! as raw JSON. Either way the object must carry an `actions` array. Every
//! failure is logged and yields `None`; a bad reply never fails the turn.

use serde::Deserialize;
use serde_json::Value;

use crate::actions::{Action, ActionBatch};

use super::tokens::preview;

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// The action batch encoded in `reply`, if any.
pub fn parse_action_batch(reply: &str) -> Option<ActionBatch> {
    let (source, candidate) = match fenced_json(reply) {
        Some(block) => {
            tracing::debug!(json = %preview(block, 100), "extracted JSON from fenced block");
            ("fenced block", block)
        }
        None => ("raw reply", reply.trim()),
    };

    let value: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(source, error = %e, "reply is not valid JSON, no actions");
            return None;
        }
    };

    let Some(Value::Array(elements)) = value.get("actions") else {
        tracing::debug!(source, "parsed JSON has no actions array");
        return None;
    };

    let actions = elements
        .iter()
        .enumerate()
        .filter_map(|(index, element)| match Action::deserialize(element) {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(source, index, error = %e, "malformed action skipped");
                None
            }
        })
        .collect();

    let thoughts = match value.get("thoughts") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };

    Some(ActionBatch { thoughts, actions })
}

/// Trimmed body of the first ```` ```json ```` block.
fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find(FENCE_OPEN)? + FENCE_OPEN.len();
    let rest = &text[start..];
    let end = rest.find(FENCE_CLOSE)?;
    Some(rest[..end].trim())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_in_prose() {
        let reply = "Let me write that.\n\n```json\n{\"thoughts\": \"write it\", \"actions\": [\
            {\"type\": \"write\", \"data\": {\"path\": \"a.txt\", \"content\": \"hi\"}},\
            {\"type\": \"stop\"}]}\n```\nDone soon.";
        let batch = parse_action_batch(reply).unwrap();
        assert_eq!(batch.thoughts.as_deref(), Some("write it"));
        assert_eq!(batch.actions.len(), 2);
        assert!(batch.has_stop());
    }

    #[test]
    fn test_raw_json_reply() {
        let batch = parse_action_batch(r#"  {"actions": [{"type": "read", "data": {"path": "x"}}]} "#)
            .unwrap();
        assert_eq!(batch.actions[0].action_type, "read");
        assert!(!batch.has_stop());
    }

    #[test]
    fn test_plain_prose_has_no_actions() {
        assert!(parse_action_batch("Here is how closures work in Rust.").is_none());
    }

    #[test]
    fn test_json_without_actions_array() {
        assert!(parse_action_batch(r#"{"answer": 42}"#).is_none());
        assert!(parse_action_batch("```json\n{\"actions\": \"read\"}\n```").is_none());
    }

    #[test]
    fn test_broken_fenced_json_does_not_fall_back() {
        // The fenced block wins even when it fails to parse
        let reply = "```json\n{not json}\n```";
        assert!(parse_action_batch(reply).is_none());
    }

    #[test]
    fn test_first_fenced_block_wins() {
        let reply = "```json\n{\"actions\": [{\"type\": \"analyze\"}]}\n```\n\
                     ```json\n{\"actions\": [{\"type\": \"stop\"}]}\n```";
        let batch = parse_action_batch(reply).unwrap();
        assert_eq!(batch.actions[0].action_type, "analyze");
    }

    #[test]
    fn test_malformed_actions_skipped_individually() {
        let reply = r#"{"thoughts": {"plan": 1}, "actions": [
            "read",
            {"type": 7},
            {"type": "write", "data": {"path": "a.txt", "content": "hi"}},
            {"type": "stop"}
        ]}"#;
        let batch = parse_action_batch(reply).unwrap();
        let types: Vec<&str> = batch.actions.iter().map(|a| a.action_type.as_str()).collect();
        assert_eq!(types, vec!["write", "stop"]);
        assert_eq!(batch.thoughts.as_deref(), Some(r#"{"plan":1}"#));
    }

    #[test]
    fn test_unterminated_fence_falls_back_to_raw() {
        assert!(parse_action_batch("```json\n{\"actions\": []}").is_none());
    }
}
