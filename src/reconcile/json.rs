//! Loose JSON recovery for structured responses.

use crate::types::{FragmentId, ParsedItem};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

const LIST_KEYS: [&str; 2] = ["items", "translations"];

pub(super) enum Payload {
    Items(Vec<ParsedItem>),
    Single(String),
}

/// Removes a surrounding Markdown code fence, if any.
pub(crate) fn strip_code_fences(text: &str) -> String {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

pub(super) fn parse_items(text: &str) -> Option<Vec<ParsedItem>> {
    match parse_payload(text)? {
        Payload::Items(items) => Some(items),
        Payload::Single(_) => None,
    }
}

pub(super) fn parse_payload(text: &str) -> Option<Payload> {
    let value = parse_value(text)?;
    payload_from_value(&value)
}

fn parse_value(text: &str) -> Option<Value> {
    let stripped = strip_code_fences(text);
    for candidate in candidates(&stripped) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
        let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Some(value);
        }
    }
    None
}

/// Whole text first, then the outermost object and array substrings.
fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                let slice = &text[start..=end];
                if !out.contains(&slice) {
                    out.push(slice);
                }
            }
        }
    }
    out
}

fn payload_from_value(value: &Value) -> Option<Payload> {
    match value {
        Value::Array(list) => Some(Payload::Items(items_from_list(list))),
        Value::Object(map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(list)) = map.get(key) {
                    return Some(Payload::Items(items_from_list(list)));
                }
            }
            match map.get("translation") {
                Some(Value::String(text)) => Some(Payload::Single(text.clone())),
                _ => None,
            }
        }
        _ => None,
    }
}

fn items_from_list(list: &[Value]) -> Vec<ParsedItem> {
    list.iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let id = coerce_id(object.get("id")?)?;
            let translation = object.get("translation")?.as_str()?.to_string();
            Some(ParsedItem { id, translation })
        })
        .collect()
}

fn coerce_id(value: &Value) -> Option<FragmentId> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .map(FragmentId),
        Value::String(s) => s.trim().parse::<u64>().ok().map(FragmentId),
        _ => None,
    }
}

/// True when the text opens a JSON document that never closes.
pub fn looks_truncated(text: &str) -> bool {
    let stripped = strip_code_fences(text);
    let Some(start) = stripped.find(['{', '[']) else {
        return false;
    };
    // Prose that merely contains a brace is not a JSON document.
    if !stripped[..start].trim().is_empty() && !text.trim_start().starts_with("```") {
        return false;
    }

    let mut depth = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    for ch in stripped[start..].chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth > 0 || in_string
}
