// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Lenient parsing of language-model output
//!
//! Model replies are untrusted text: JSON may arrive wrapped in code fences,
//! prefixed with chatter, or truncated. These helpers salvage what they can;
//! every field is still type-checked at the call site before use.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("valid regex")
    })
}

fn strip_code_fences(text: &str) -> &str {
    let raw = text.trim();
    if let Some(caps) = fence_re().captures(raw) {
        if let Some(m) = caps.get(1) {
            return m.as_str().trim();
        }
    }
    raw
}

/// Parse a single JSON value starting at `offset`, ignoring trailing garbage.
fn value_at(raw: &str, offset: usize) -> Option<Value> {
    let mut de = serde_json::Deserializer::from_str(&raw[offset..]);
    Value::deserialize(&mut de).ok()
}

/// Best-effort extraction of a JSON object from model output.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let raw = strip_code_fences(text);
    if raw.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return Some(map);
    }
    for (idx, _) in raw.match_indices('{') {
        if let Some(Value::Object(map)) = value_at(raw, idx) {
            return Some(map);
        }
    }
    None
}

/// Best-effort extraction of any JSON value from model output.
///
/// Batch classification replies are JSON lists, so array starts are probed too.
pub fn extract_json_any(text: &str) -> Option<Value> {
    let raw = strip_code_fences(text);
    if raw.is_empty() {
        return None;
    }
    if let Ok(val) = serde_json::from_str::<Value>(raw) {
        return Some(val);
    }
    for (idx, ch) in raw.char_indices() {
        if ch == '{' || ch == '[' {
            if let Some(val) = value_at(raw, idx) {
                return Some(val);
            }
        }
    }
    None
}

/// Coerce a value to a non-empty trimmed string.
pub fn coerce_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Coerce a value to a list of non-empty strings, dropping anything else.
pub fn coerce_string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Coerce a value to f64, accepting integers too.
pub fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    value?.as_f64()
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(19\d{2}|20\d{2})$").expect("valid regex"))
}

/// True for a plausible year string (1900-2099).
pub fn is_year(value: &str) -> bool {
    year_re().is_match(value.trim())
}

const MAX_RAW_OUTPUT_CHARS: usize = 12_000;

/// Truncate raw model output kept for diagnosis, preserving head and tail.
pub fn truncate_raw_output(text: &str) -> String {
    let raw = text.trim();
    if raw.chars().count() <= MAX_RAW_OUTPUT_CHARS {
        return raw.to_string();
    }
    let head: String = raw.chars().take(MAX_RAW_OUTPUT_CHARS - 200).collect();
    let tail: String = {
        let chars: Vec<char> = raw.chars().collect();
        chars[chars.len() - 200..].iter().collect()
    };
    format!("{head}\n...[truncated]...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_object_plain() {
        let map = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(map.get("a").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn test_extract_object_fenced() {
        let text = "Here you go:\n```json\n{\"category\": \"house\"}\n```\nanything else?";
        let map = extract_json_object(text).unwrap();
        assert_eq!(map.get("category").unwrap().as_str(), Some("house"));
    }

    #[test]
    fn test_extract_object_with_prefix_chatter() {
        let text = "Sure! The JSON is {\"x\": true} as requested.";
        let map = extract_json_object(text).unwrap();
        assert_eq!(map.get("x").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_extract_object_rejects_non_objects() {
        assert!(extract_json_object("[1, 2]").is_none());
        assert!(extract_json_object("not json at all").is_none());
        assert!(extract_json_object("").is_none());
    }

    #[test]
    fn test_extract_any_prefers_full_parse() {
        let val = extract_json_any("[{\"path\": \"a\"}]").unwrap();
        assert!(val.is_array());
    }

    #[test]
    fn test_extract_any_salvages_embedded_list() {
        let text = "Result follows: [ {\"path\": \"a\"} ] trailing words";
        let val = extract_json_any(text).unwrap();
        assert_eq!(val.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_coerce_string_list_filters_junk() {
        let v: Value = serde_json::json!(["a", "", 3, "  b "]);
        assert_eq!(coerce_string_list(Some(&v)), vec!["a", "b"]);
        assert!(coerce_string_list(Some(&Value::Null)).is_empty());
        assert!(coerce_string_list(None).is_empty());
    }

    #[test]
    fn test_is_year() {
        assert!(is_year("1999"));
        assert!(is_year("2024"));
        assert!(is_year(" 2024 "));
        assert!(!is_year("2100"));
        assert!(!is_year("199"));
        assert!(!is_year("year"));
    }

    #[test]
    fn test_truncate_raw_output_keeps_head_and_tail() {
        let long = "x".repeat(20_000);
        let out = truncate_raw_output(&long);
        assert!(out.len() < 13_000);
        assert!(out.contains("...[truncated]..."));
        assert_eq!(truncate_raw_output("short"), "short");
    }
}
