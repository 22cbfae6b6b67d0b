//! Compact summaries of tool inputs and outputs.
//!
//! Tool calls can carry dozens of image paths or whole documents; the
//! session log keeps a bounded rendering instead.

use serde_json::{Map, Value};

/// Strings longer than this are cut.
pub const MAX_TEXT_CHARS: usize = 500;

/// Lists longer than this collapse to `[N items]`.
pub const MAX_LIST_ITEMS: usize = 5;

/// Cut `text` to [`MAX_TEXT_CHARS`] characters, appending `...` when cut.
pub fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render a tool input as compact JSON.
///
/// Top-level object fields that are long lists become `"[N items]"` and
/// long strings are truncated. Non-object inputs are rendered as-is and
/// truncated as text.
pub fn summarize_input(input: &Value) -> String {
    match input {
        Value::Object(fields) => {
            let display: Map<String, Value> = fields
                .iter()
                .map(|(key, value)| (key.clone(), summarize_field(value)))
                .collect();
            Value::Object(display).to_string()
        }
        Value::Null => String::new(),
        Value::String(s) => truncate_text(s),
        other => truncate_text(&other.to_string()),
    }
}

fn summarize_field(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() > MAX_LIST_ITEMS => {
            Value::String(format!("[{} items]", items.len()))
        }
        Value::String(s) if s.chars().count() > MAX_TEXT_CHARS => Value::String(truncate_text(s)),
        other => other.clone(),
    }
}

/// Heuristic used when a tool reports failure only in its text output.
pub fn looks_like_error(output: &str) -> bool {
    output.to_lowercase().contains("error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_list_collapses() {
        let paths: Vec<String> = (0..47).map(|i| format!("creators/{i}.png")).collect();
        let summary = summarize_input(&json!({ "image_paths": paths, "mode": "batch" }));
        let value: Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(value["image_paths"], "[47 items]");
        assert_eq!(value["mode"], "batch");
    }

    #[test]
    fn test_short_list_kept() {
        let summary = summarize_input(&json!({ "tags": ["a", "b"] }));
        let value: Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(value["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_long_string_truncated() {
        let long = "x".repeat(MAX_TEXT_CHARS + 20);
        let cut = truncate_text(&long);
        assert_eq!(cut.len(), MAX_TEXT_CHARS + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_text("short"), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_TEXT_CHARS + 1);
        let cut = truncate_text(&long);
        assert_eq!(cut.chars().count(), MAX_TEXT_CHARS + 3);
    }

    #[test]
    fn test_error_heuristic() {
        assert!(looks_like_error("ERROR: model refused"));
        assert!(!looks_like_error("post saved to output/post.md"));
    }
}
