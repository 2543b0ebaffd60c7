//! Extraction of human-readable text from heterogeneous backend output.
//!
//! Backends emit either plain text or JSON-structured event records, one per
//! line. Only fragments a human should see survive: string values under a
//! `text` or `delta` key (case-insensitive), anywhere up to a bounded depth.

use serde_json::Value;

/// Nesting depth bound for the JSON walk.
const MAX_DEPTH: usize = 5;

/// Keys whose string values count as human-readable text.
const TEXT_KEYS: [&str; 2] = ["text", "delta"];

/// Extracts zero or more text fragments from one raw output line.
///
/// A line that parses as JSON yields its text-keyed strings, deduplicated in
/// first-seen order; valid JSON with no text is deliberately suppressed. A
/// non-JSON line is already human-readable and comes back whole, with the
/// newline the line reader stripped restored.
pub fn parse_model_output_line(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => {
            let mut fragments = Vec::new();
            collect_text(&value, None, 0, &mut fragments);
            fragments
        }
        Err(_) => vec![format!("{trimmed}\n")],
    }
}

fn collect_text(value: &Value, key_hint: Option<&str>, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(text) => {
            let keyed = key_hint.is_some_and(|key| TEXT_KEYS.contains(&key.to_lowercase().as_str()));
            if keyed && !text.trim().is_empty() && !out.iter().any(|seen| seen == text) {
                out.push(text.clone());
            }
        }
        // Array elements inherit the parent key as hint.
        Value::Array(items) => {
            for item in items {
                collect_text(item, key_hint, depth + 1, out);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                collect_text(nested, Some(key), depth + 1, out);
            }
        }
        _ => {}
    }
}
