//! Action batch schema exchanged with the model.
//!
//! The model replies with `{"thoughts": "...", "actions": [{"type": ..,
//! "data": {..}}]}`. After execution each action carries a `result`, and the
//! whole array is serialized back into the conversation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Action Kinds ───────────────────────────────────────────────────────────

/// The action types the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Read,
    Write,
    Search,
    Command,
    Execute,
    Analyze,
    Browse,
    Edit,
    Stop,
}

impl ActionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(ActionKind::Read),
            "write" => Some(ActionKind::Write),
            "search" => Some(ActionKind::Search),
            "command" => Some(ActionKind::Command),
            "execute" => Some(ActionKind::Execute),
            "analyze" => Some(ActionKind::Analyze),
            "browse" => Some(ActionKind::Browse),
            "edit" => Some(ActionKind::Edit),
            "stop" => Some(ActionKind::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Search => "search",
            ActionKind::Command => "command",
            ActionKind::Execute => "execute",
            ActionKind::Analyze => "analyze",
            ActionKind::Browse => "browse",
            ActionKind::Edit => "edit",
            ActionKind::Stop => "stop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Actions ────────────────────────────────────────────────────────────────

/// Outcome attached to an action after it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionResult {
    Failure { error: String },
    Success(Value),
}

impl ActionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ActionResult::Failure { .. })
    }
}

/// One typed operation requested by the model.
///
/// The type is kept as the raw string so an unrecognized type can be
/// reported back by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type", default)]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

impl Action {
    pub fn new(action_type: &str, data: Value) -> Self {
        Self {
            action_type: action_type.to_string(),
            data,
            result: None,
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(&self.action_type)
    }

    pub fn is_stop(&self) -> bool {
        self.kind() == Some(ActionKind::Stop)
    }
}

/// Everything parsed from one model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    pub actions: Vec<Action>,
}

impl ActionBatch {
    /// Whether this batch ends the loop once all of its actions ran.
    pub fn has_stop(&self) -> bool {
        self.actions.iter().any(Action::is_stop)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_deserializes_without_thoughts_or_data() {
        let batch: ActionBatch =
            serde_json::from_value(json!({"actions": [{"type": "stop"}]})).unwrap();
        assert!(batch.thoughts.is_none());
        assert!(batch.has_stop());
        assert!(batch.actions[0].data.is_null());
    }

    #[test]
    fn test_unknown_type_is_kept_by_name() {
        let action: Action = serde_json::from_value(json!({"type": "teleport"})).unwrap();
        assert_eq!(action.kind(), None);
        assert_eq!(action.action_type, "teleport");
    }

    #[test]
    fn test_result_serialization_shapes() {
        let mut ok = Action::new("write", json!({"path": "a.txt"}));
        ok.result = Some(ActionResult::Success(json!({"success": true})));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"type": "write", "data": {"path": "a.txt"}, "result": {"success": true}})
        );

        let mut failed = Action::new("read", json!({"path": "b"}));
        failed.result = Some(ActionResult::Failure {
            error: "boom".into(),
        });
        assert_eq!(serde_json::to_value(&failed).unwrap()["result"], json!({"error": "boom"}));
        assert!(failed.result.unwrap().is_error());
    }

    #[test]
    fn test_kind_round_trip() {
        for name in [
            "read", "write", "search", "command", "execute", "analyze", "browse", "edit", "stop",
        ] {
            assert_eq!(ActionKind::parse(name).unwrap().as_str(), name);
        }
    }
}
