//! In-memory application of `edit` action operations.
//!
//! `edits` is either a string (the new file content) or an object with an
//! `operations` array. Operations apply in order, each against the output
//! of the previous one. Line numbers are 1-based and inclusive. Fields are
//! read leniently: a zero or missing line number counts as absent, and an
//! operation whose required fields are absent does nothing.

use regex::RegexBuilder;
use serde_json::{json, Value};

use super::errors::ActionError;

/// Result of applying an `edits` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub content: String,
    /// One record per operation that ran.
    pub operations: Vec<Value>,
}

/// Apply `edits` to `original`.
pub fn apply_edits(original: &str, edits: &Value) -> Result<EditOutcome, ActionError> {
    if let Value::String(replacement) = edits {
        return Ok(EditOutcome {
            content: replacement.clone(),
            operations: vec![json!({"operation": "replace-all", "success": true})],
        });
    }

    let Some(ops) = edits.get("operations").and_then(Value::as_array) else {
        tracing::warn!("edit payload has neither a string nor an operations array");
        return Ok(EditOutcome {
            content: original.to_string(),
            operations: Vec::new(),
        });
    };

    let mut content = original.to_string();
    let mut records = Vec::new();

    for op in ops {
        let op_type = op.get("type").and_then(Value::as_str).unwrap_or_default();
        let record = match op_type {
            "replace" => replace(&mut content, op)?,
            "insert" => insert(&mut content, op),
            "delete" => delete(&mut content, op),
            other => {
                tracing::warn!(operation = other, "skipping unknown edit operation");
                None
            }
        };
        records.extend(record);
    }

    Ok(EditOutcome {
        content,
        operations: records,
    })
}

// ─── Operations ─────────────────────────────────────────────────────────────

fn replace(content: &mut String, op: &Value) -> Result<Option<Value>, ActionError> {
    if let (Some(start), Some(end)) = (line_field(op, "startLine"), line_field(op, "endLine")) {
        let new_text = str_field(op, "newText").unwrap_or_default();
        *content = splice_lines(content, start, end, Some(new_text));
        return Ok(Some(json!({
            "operation": "replace",
            "startLine": start,
            "endLine": end,
            "success": true,
        })));
    }

    let Some(pattern) = str_field(op, "pattern").filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    let flags = str_field(op, "flags").unwrap_or("g");
    let replacement = str_field(op, "replacement").unwrap_or_default();

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| ActionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

    let occurrences = if flags.contains('g') {
        let n = regex.find_iter(content.as_str()).count();
        *content = regex.replace_all(content.as_str(), replacement).into_owned();
        n
    } else {
        let n = usize::from(regex.is_match(content.as_str()));
        *content = regex.replacen(content.as_str(), 1, replacement).into_owned();
        n
    };

    Ok(Some(json!({
        "operation": "replace",
        "pattern": pattern,
        "occurrences": occurrences,
        "success": true,
    })))
}

fn insert(content: &mut String, op: &Value) -> Option<Value> {
    let text = str_field(op, "text").unwrap_or_default();

    if let Some(line) = line_field(op, "line") {
        let mut lines: Vec<&str> = content.split('\n').collect();
        let idx = (line - 1).min(lines.len());
        lines.insert(idx, text);
        *content = lines.join("\n");
        return Some(json!({"operation": "insert", "line": line, "success": true}));
    }

    match str_field(op, "position") {
        Some("start") => {
            content.insert_str(0, text);
            Some(json!({"operation": "insert", "position": "start", "success": true}))
        }
        Some("end") => {
            content.push_str(text);
            Some(json!({"operation": "insert", "position": "end", "success": true}))
        }
        _ => None,
    }
}

fn delete(content: &mut String, op: &Value) -> Option<Value> {
    let (start, end) = (line_field(op, "startLine")?, line_field(op, "endLine")?);
    *content = splice_lines(content, start, end, None);
    Some(json!({
        "operation": "delete",
        "startLine": start,
        "endLine": end,
        "success": true,
    }))
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Replace lines `start..=end` (1-based) with `replacement`, or drop them.
///
/// Out-of-range bounds clamp to the file. An inverted range keeps both the
/// head before `start` and the tail after `end`.
fn splice_lines(content: &str, start: usize, end: usize, replacement: Option<&str>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let start_idx = (start - 1).min(lines.len());
    let end_idx = end.min(lines.len());

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..start_idx]);
    out.extend(replacement);
    out.extend_from_slice(&lines[end_idx..]);
    out.join("\n")
}

/// A positive line number from a number or numeric string field.
fn line_field(op: &Value, key: &str) -> Option<usize> {
    let value = op.get(key)?;
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n >= 1.0).then_some(n as usize)
}

fn str_field<'a>(op: &'a Value, key: &str) -> Option<&'a str> {
    op.get(key).and_then(Value::as_str)
}

/// The `{success, path, operations, diff}` result of an edit action.
pub fn edit_report(path: &str, before: &str, outcome: &EditOutcome) -> Value {
    let before_len = before.chars().count() as i64;
    let after_len = outcome.content.chars().count() as i64;

    json!({
        "success": true,
        "path": path,
        "operations": outcome.operations,
        "diff": {
            "before": before_len,
            "after": after_len,
            "changeSize": after_len - before_len,
        },
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE: &str = "l1\nl2\nl3\nl4\nl5";

    fn ops(list: Value) -> Value {
        json!({ "operations": list })
    }

    #[test]
    fn test_replace_line_range() {
        let out = apply_edits(
            FIVE,
            &ops(json!([{"type": "replace", "startLine": 2, "endLine": 3, "newText": "X"}])),
        )
        .unwrap();
        assert_eq!(out.content, "l1\nX\nl4\nl5");
        assert_eq!(out.operations[0]["startLine"], 2);
    }

    #[test]
    fn test_replace_range_past_end_clamps() {
        let out = apply_edits(
            FIVE,
            &ops(json!([{"type": "replace", "startLine": 4, "endLine": 99, "newText": "tail"}])),
        )
        .unwrap();
        assert_eq!(out.content, "l1\nl2\nl3\ntail");
    }

    #[test]
    fn test_regex_replace_global_by_default() {
        let out = apply_edits(
            "foo bar foo",
            &ops(json!([{"type": "replace", "pattern": "foo", "replacement": "baz"}])),
        )
        .unwrap();
        assert_eq!(out.content, "baz bar baz");
        assert_eq!(out.operations[0]["occurrences"], 2);
    }

    #[test]
    fn test_regex_flags() {
        let out = apply_edits(
            "Foo foo",
            &ops(json!([{"type": "replace", "pattern": "foo", "replacement": "x", "flags": "i"}])),
        )
        .unwrap();
        // No 'g': first match only
        assert_eq!(out.content, "x foo");
        assert_eq!(out.operations[0]["occurrences"], 1);
    }

    #[test]
    fn test_regex_capture_groups() {
        let out = apply_edits(
            "let a = 1;",
            &ops(json!([{"type": "replace", "pattern": "let (\\w+)", "replacement": "const $1"}])),
        )
        .unwrap();
        assert_eq!(out.content, "const a = 1;");
    }

    #[test]
    fn test_invalid_regex_errors() {
        let err = apply_edits("x", &ops(json!([{"type": "replace", "pattern": "("}]))).unwrap_err();
        assert!(matches!(err, ActionError::InvalidPattern { .. }));
    }

    #[test]
    fn test_insert_at_line_start_and_end() {
        let out = apply_edits(
            "a\nb",
            &ops(json!([
                {"type": "insert", "line": 2, "text": "mid"},
                {"type": "insert", "position": "start", "text": ">"},
                {"type": "insert", "position": "end", "text": "<"},
                {"type": "insert", "line": 100, "text": "last"}
            ])),
        )
        .unwrap();
        assert_eq!(out.content, ">a\nmid\nb<\nlast");
        assert_eq!(out.operations.len(), 4);
    }

    #[test]
    fn test_delete_lines() {
        let out = apply_edits(
            FIVE,
            &ops(json!([{"type": "delete", "startLine": 1, "endLine": 2}])),
        )
        .unwrap();
        assert_eq!(out.content, "l3\nl4\nl5");
    }

    #[test]
    fn test_operations_apply_sequentially() {
        let out = apply_edits(
            FIVE,
            &ops(json!([
                {"type": "delete", "startLine": 1, "endLine": 1},
                {"type": "replace", "startLine": 1, "endLine": 1, "newText": "first"}
            ])),
        )
        .unwrap();
        assert_eq!(out.content, "first\nl3\nl4\nl5");
    }

    #[test]
    fn test_unknown_and_incomplete_operations_are_skipped() {
        let out = apply_edits(
            FIVE,
            &ops(json!([
                {"type": "rotate"},
                {"type": "delete", "startLine": 0, "endLine": 2},
                {"type": "replace", "newText": "nothing to anchor"}
            ])),
        )
        .unwrap();
        assert_eq!(out.content, FIVE);
        assert!(out.operations.is_empty());
    }

    #[test]
    fn test_string_edits_replace_everything() {
        let out = apply_edits(FIVE, &json!("brand new")).unwrap();
        assert_eq!(out.content, "brand new");
        assert_eq!(out.operations[0]["operation"], "replace-all");
    }

    #[test]
    fn test_numeric_string_line_numbers() {
        let out = apply_edits(
            FIVE,
            &ops(json!([{"type": "delete", "startLine": "5", "endLine": "5"}])),
        )
        .unwrap();
        assert_eq!(out.content, "l1\nl2\nl3\nl4");
    }

    #[test]
    fn test_edit_report_counts_chars() {
        let outcome = EditOutcome {
            content: "héllo!".into(),
            operations: vec![],
        };
        let report = edit_report("a.txt", "héllo", &outcome);
        assert_eq!(report["diff"], json!({"before": 5, "after": 6, "changeSize": 1}));
        assert_eq!(report["path"], "a.txt");
        assert_eq!(report["success"], true);
    }
}
