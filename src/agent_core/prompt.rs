//! System prompt and ambient editor context.
//!
//! The system prompt teaches the model the action schema. The context text
//! is rebuilt from the host before every user turn and after every batch
//! that does not stop.

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::actions::Action;
use crate::host::{ActiveEditor, HostEditor, OpenDocument};

/// Lines shown on each side of the cursor when nothing is selected.
const CURSOR_CONTEXT_LINES: usize = 3;

// ─── System Prompt ──────────────────────────────────────────────────────────

/// Build the system prompt for the current host state.
pub fn system_prompt(host: &dyn HostEditor) -> String {
    let workspace = host
        .workspace_root()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "No workspace open".to_string());

    let (last_edited, last_edit_line) = match host.recent_edit() {
        Some(edit) => (
            edit.path.clone(),
            format!("\n- Last edit: {}", local_time(&edit.at)),
        ),
        None => ("None".to_string(), String::new()),
    };

    format!(
        r#"You are a code editor AI Assistant with agency capabilities. You can perform actions on the user's workspace.

ENVIRONMENT CONTEXT:
- OS: {os}
- Workspace: {workspace}
- Last edited file: {last_edited}{last_edit_line}

When you need to perform actions, respond with JSON in the following format:
```json
{{
  "thoughts": "Your reasoning about what needs to be done",
  "actions": [
    {{
      "type": "read|write|search|command|analyze|execute|browse|edit|stop",
      "data": {{ ... action specific data ... }}
    }}
  ]
}}
```

Action types and their data:
- read: {{ "path": "relative/or/absolute/path" }}
- write: {{ "path": "relative/or/absolute/path", "content": "file content" }}
- search: {{ "type": "files", "pattern": "glob pattern" }} or {{ "type": "text", "text": "search text" }}
- command: {{ "command": "command string to execute in terminal" }}
- execute: {{ "language": "js|python|bash|...", "code": "code to execute" }}
- analyze: {{ "code": "code to analyze", "question": "what you want to analyze" }}
- browse: {{ "query": "search query", "numResults": 5 }} (free web search using DuckDuckGo, optional numResults)
- edit: {{
    "path": "relative/or/absolute/path",
    "edits": {{
      "operations": [
        {{ "type": "replace", "startLine": 10, "endLine": 15, "newText": "new code here" }},
        {{ "type": "replace", "pattern": "oldFunction\\(\\)", "replacement": "newFunction()", "flags": "g" }},
        {{ "type": "insert", "line": 20, "text": "new line of code here" }},
        {{ "type": "insert", "position": "start", "text": "// Header comment" }},
        {{ "type": "insert", "position": "end", "text": "// Footer comment" }},
        {{ "type": "delete", "startLine": 25, "endLine": 30 }}
      ]
    }}
  }} (edit specific parts of an existing file)
- stop: {{}} (use this to indicate you're done with the task and no more actions are needed)

CONTEXTUAL UNDERSTANDING:
Before every response, I will automatically gather information about the user's current context, including:
- Currently open files
- Current editor selection
- Recent edits
- Open terminals

By default, you will continue to take actions in a loop until you decide to stop with the 'stop' action type.
Always wrap your JSON in markdown code blocks with the json language specifier.
When executing code or commands that might be potentially harmful, explain what the code does before executing it.
"#,
        os = std::env::consts::OS,
    )
}

// ─── Ambient Context ────────────────────────────────────────────────────────

/// Describe what the user is looking at right now.
pub async fn gather_context(host: &dyn HostEditor) -> String {
    let documents = host.open_documents().await;
    let mut context = String::new();

    match host.active_editor() {
        Some(editor) => {
            let text = documents
                .iter()
                .find(|d| d.path == editor.path)
                .map(|d| d.text.as_str());
            render_active_editor(&mut context, &editor, text);
        }
        None => context.push_str("No active editor\n"),
    }

    render_open_editors(&mut context, &documents);

    if let Some(edit) = host.recent_edit() {
        context.push_str("\nRECENT EDITS:\n");
        context.push_str(&format!(
            "- Last modified: {} at {}\n",
            edit.path,
            local_time(&edit.at)
        ));
    }

    context.push_str("\nTERMINAL:\n");
    let terminals = host.terminals();
    if terminals.is_empty() {
        context.push_str("No active terminals\n");
    } else {
        for name in terminals {
            context.push_str(&format!("- {name}\n"));
        }
    }

    context
}

fn render_active_editor(out: &mut String, editor: &ActiveEditor, text: Option<&str>) {
    out.push_str("ACTIVE EDITOR:\n");
    out.push_str(&format!("- File: {}\n", editor.path));
    out.push_str(&format!(
        "- Language: {}\n",
        editor.language_id.as_deref().unwrap_or("plaintext")
    ));

    if let Some(sel) = &editor.selection {
        out.push_str(&format!(
            "- Selection (Lines {}-{}):\n```\n{}\n```\n",
            sel.start_line, sel.end_line, sel.text
        ));
        return;
    }

    let Some(text) = text else {
        return;
    };
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return;
    }

    let cursor = editor.cursor_line.clamp(1, lines.len()) - 1;
    let start = cursor.saturating_sub(CURSOR_CONTEXT_LINES);
    let end = (cursor + CURSOR_CONTEXT_LINES).min(lines.len() - 1);

    let excerpt: Vec<String> = (start..=end)
        .map(|i| {
            let marker = if i == cursor { "> " } else { "  " };
            format!("{marker}{}", lines[i])
        })
        .collect();

    out.push_str(&format!(
        "- Code around cursor (Line {}):\n```\n{}\n```\n",
        cursor + 1,
        excerpt.join("\n")
    ));
}

fn render_open_editors(out: &mut String, documents: &[OpenDocument]) {
    if documents.is_empty() {
        return;
    }
    out.push_str("\nOPEN EDITORS:\n");
    for doc in documents {
        out.push_str(&format!("- {}\n", doc.path));
    }
}

/// Render an RFC 3339 time as local wall-clock time.
fn local_time(rfc3339: &str) -> String {
    DateTime::parse_from_rfc3339(rfc3339)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| rfc3339.to_string())
}

// ─── Loop Messages ──────────────────────────────────────────────────────────

/// System message carrying context at the start of a user turn.
pub fn user_context_message(context: &str) -> String {
    format!("Current user context:\n{context}")
}

/// System message carrying context after a batch ran.
pub fn updated_context_message(context: &str) -> String {
    format!("Updated context after actions:\n{context}")
}

/// System message feeding executed actions back to the model.
pub fn results_message(executed: &[Action]) -> String {
    let pretty = serde_json::to_string_pretty(executed).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to pretty-print action results");
        Value::Null.to_string()
    });

    format!(
        "The assistant has completed the actions. Here are the results:\n\
         ```json\n{pretty}\n```\n\n\
         Based on these results, determine what to do next. You can:\n\
         1. Continue with more actions by returning a new JSON with \"actions\" array\n\
         2. Stop the iteration by including an action with \"type\": \"stop\" if the task is completed\n\
         3. Provide a final response to the user with your findings\n\n\
         Please analyze these results and respond appropriately."
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionResult;
    use crate::host::{DocumentRef, EditorState, LocalWorkspace, RecentEdit, Selection};
    use serde_json::json;

    fn workspace(state: EditorState) -> LocalWorkspace {
        let ws = LocalWorkspace::new(Some("/work".into()));
        ws.set_editor_state(state);
        ws
    }

    fn doc(path: &str, text: &str) -> DocumentRef {
        DocumentRef {
            path: path.into(),
            language_id: Some("rust".into()),
            version: 1,
            text: Some(text.into()),
        }
    }

    #[test]
    fn test_system_prompt_mentions_workspace_and_schema() {
        let ws = workspace(EditorState::default());
        let prompt = system_prompt(&ws);
        assert!(prompt.contains("- Workspace: /work"));
        assert!(prompt.contains("- Last edited file: None"));
        assert!(prompt.contains("```json"));
        assert!(prompt.contains("\"type\": \"delete\", \"startLine\": 25"));
        assert!(!prompt.contains("Last edit:"));
    }

    #[tokio::test]
    async fn test_context_without_editor() {
        let ws = workspace(EditorState::default());
        let ctx = gather_context(&ws).await;
        assert!(ctx.starts_with("No active editor\n"));
        assert!(ctx.contains("TERMINAL:\nNo active terminals"));
        assert!(!ctx.contains("OPEN EDITORS"));
    }

    #[tokio::test]
    async fn test_context_cursor_window() {
        let text = (1..=10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let ws = workspace(EditorState {
            active_editor: Some(ActiveEditor {
                path: "/work/main.rs".into(),
                language_id: Some("rust".into()),
                selection: None,
                cursor_line: 5,
            }),
            open_documents: vec![doc("/work/main.rs", &text)],
            terminals: vec!["zsh".into()],
            recent_edit: Some(RecentEdit {
                path: "/work/main.rs".into(),
                at: "not a time".into(),
            }),
        });

        let ctx = gather_context(&ws).await;
        assert!(ctx.contains("- File: /work/main.rs\n- Language: rust\n"));
        assert!(ctx.contains("- Code around cursor (Line 5):"));
        assert!(ctx.contains("  line2\n  line3\n  line4\n> line5\n  line6\n  line7\n  line8\n```"));
        assert!(!ctx.contains("line1\n"));
        assert!(ctx.contains("OPEN EDITORS:\n- /work/main.rs"));
        assert!(ctx.contains("- Last modified: /work/main.rs at not a time"));
        assert!(ctx.contains("TERMINAL:\n- zsh"));
    }

    #[tokio::test]
    async fn test_context_selection() {
        let ws = workspace(EditorState {
            active_editor: Some(ActiveEditor {
                path: "/work/a.py".into(),
                language_id: None,
                selection: Some(Selection {
                    start_line: 2,
                    end_line: 3,
                    text: "x = 1\ny = 2".into(),
                }),
                cursor_line: 3,
            }),
            ..Default::default()
        });
        let ctx = gather_context(&ws).await;
        assert!(ctx.contains("- Selection (Lines 2-3):\n```\nx = 1\ny = 2\n```"));
    }

    #[test]
    fn test_results_message_embeds_pretty_json() {
        let mut action = Action::new("stop", serde_json::Value::Null);
        action.result = Some(ActionResult::Success(json!({"stopped": true})));
        let msg = results_message(&[action]);
        assert!(msg.starts_with("The assistant has completed the actions. Here are the results:\n```json\n["));
        assert!(msg.contains("\"stopped\": true"));
        assert!(msg.ends_with("Please analyze these results and respond appropriately."));
    }
}
