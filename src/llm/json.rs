//! Best-effort JSON recovery from free-form model output
//!
//! Models wrap JSON in markdown fences, prepend chatter, or get cut off at
//! the token limit. These helpers find the first balanced JSON value, salvage
//! the complete elements of a truncated array, and report anything else as an
//! error string that providers turn into `ProviderError::Parse`.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Keys checked (in order) when a candidate arrives as an object
const TEXT_KEYS: &[&str] = &["content", "copy", "text", "body", "headline"];

/// Keys checked (in order) when the array is wrapped in an object
const LIST_KEYS: &[&str] = &["copies", "candidates", "results", "items"];

/// Strip a surrounding markdown code fence, if any
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip a language tag such as ```json
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        let body = &after[body_start..];
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    trimmed
}

/// Outcome of scanning for a JSON value
enum Scan<'a> {
    /// A balanced value was found
    Complete(&'a str),
    /// An opening bracket was found but never closed
    Truncated(&'a str),
    /// No `[` or `{` in the text
    Missing,
}

/// Locate the first balanced JSON array or object, honouring string literals
fn scan_json(text: &str) -> Scan<'_> {
    let Some(start) = text.find(['[', '{']) else {
        return Scan::Missing;
    };
    let rest = &text[start..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in rest.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Scan::Complete(&rest[..=i]);
                }
            }
            _ => {}
        }
    }

    Scan::Truncated(rest)
}

/// Salvage the complete top-level elements of a cut-off array
fn recover_truncated_array(partial: &str) -> Option<Value> {
    if !partial.starts_with('[') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_boundary = None;

    for (i, c) in partial.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 1 => last_boundary = Some(i),
            _ => {}
        }
    }

    let cut = last_boundary?;
    serde_json::from_str(&format!("{}]", &partial[..cut])).ok()
}

/// Parse the first JSON value in `raw`, recovering truncated arrays
pub fn extract_value(raw: &str) -> Result<Value, String> {
    let body = strip_fences(raw);

    match scan_json(body) {
        Scan::Complete(json) => {
            serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))
        }
        Scan::Truncated(partial) => recover_truncated_array(partial)
            .ok_or_else(|| "JSON output was truncated and could not be recovered".to_string()),
        Scan::Missing => Err("no JSON value found in model output".to_string()),
    }
}

/// Deserialize the first JSON value in `raw` into `T`
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let value = extract_value(raw)?;
    serde_json::from_value(value).map_err(|e| format!("unexpected JSON shape: {}", e))
}

fn candidate_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Extract candidate copy texts from model output
///
/// Accepts `["a", "b"]`, `[{"copy": "a"}]` and `{"copies": [...]}`. An empty
/// array is a valid (empty) answer; text without any JSON array is an error.
pub fn parse_candidates(raw: &str) -> Result<Vec<String>, String> {
    let value = extract_value(raw)?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .ok_or_else(|| "JSON object has no list of copies".to_string())?,
        _ => return Err("expected a JSON array of copies".to_string()),
    };

    Ok(items
        .iter()
        .filter_map(candidate_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
