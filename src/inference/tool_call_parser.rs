//! Tool-call extraction.
//!
//! Recovers `ToolCallRequest`s from an [`InferenceResponse`]. Native calls
//! pass through with their ids checked. Free text is searched for the
//! `{"tool_calls": [...]}` wire object in three stages, each followed by a
//! lenient JSON parse:
//!
//! 1. balanced scan outward from the `tool_calls` key,
//! 2. bounded pattern capture of the enclosing object,
//! 3. pattern capture of the bare array value.
//!
//! Thinking sections are removed before any of this runs.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::thinking::strip_thinking;
use super::types::{InferenceResponse, ToolCallRequest};

// ─── Constants ───────────────────────────────────────────────────────────────

/// The wire-format key.
pub const TOOL_CALLS_KEY: &str = "tool_calls";

/// Substrings whose presence suggests a tool call is being written.
pub const TOOL_CALL_MARKERS: &[&str] = &[
    "tool_calls\"",
    "\"tool_calls\"",
    "{\"tool_calls\"",
    "'tool_calls'",
];

/// Hex characters of the digest kept in generated ids.
const GENERATED_ID_HEX_LEN: usize = 24;

// ─── Public API ──────────────────────────────────────────────────────────────

/// How much of the JSON the caller expects to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// The response is final; unterminated JSON is closed by repair.
    Complete,
    /// The text is still arriving; unterminated JSON means "not yet".
    Partial,
}

/// Extract tool calls from an engine response.
///
/// Returns `None` when the response carries no usable tool call. Never fails:
/// unparseable text is simply not a tool call.
pub fn extract(response: &InferenceResponse) -> Option<Vec<ToolCallRequest>> {
    match response {
        InferenceResponse::Structured(calls) if !calls.is_empty() => {
            Some(assign_missing_ids(calls.clone()))
        }
        InferenceResponse::Structured(_) => None,
        InferenceResponse::Freeform(text) => extract_from_text(text, ExtractMode::Complete),
        InferenceResponse::Diagnostic { .. } => None,
    }
}

/// Extract tool calls from free text.
pub fn extract_from_text(text: &str, mode: ExtractMode) -> Option<Vec<ToolCallRequest>> {
    let answer = strip_thinking(text);
    if !answer.contains(TOOL_CALLS_KEY) {
        return None;
    }

    let calls = balanced_regions(&answer, mode)
        .find_map(|region| {
            parse_lenient(region, mode).and_then(|value| records_from_object(&value))
        })
        .or_else(|| {
            object_pattern()?
                .find(&answer)
                .and_then(|m| parse_lenient(m.as_str(), mode))
                .and_then(|value| records_from_object(&value))
        })
        .or_else(|| {
            array_pattern()?
                .captures(&answer)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_lenient(m.as_str(), mode))
                .and_then(|value| records_from_array(&value))
        })?;

    tracing::debug!(count = calls.len(), ?mode, "extracted tool calls from text");
    Some(calls)
}

/// True if any tool-call marker occurs in `text`.
pub fn contains_marker(text: &str) -> bool {
    TOOL_CALL_MARKERS.iter().any(|m| text.contains(m))
}

/// Deterministic id for a call that arrived without a usable one.
///
/// Derived from position, name and arguments so extracting the same text
/// twice yields the same ids.
pub fn generate_call_id(index: usize, name: &str, arguments: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(Value::Object(arguments.clone()).to_string().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("call_{}", &hex[..GENERATED_ID_HEX_LEN])
}

// ─── Region Location ─────────────────────────────────────────────────────────

/// For each `tool_calls` key in order, the smallest object enclosing it,
/// found by walking back to the unmatched `{` and scanning forward to its
/// partner. Keys mentioned in prose have no enclosing object and are skipped.
fn balanced_regions(text: &str, mode: ExtractMode) -> impl Iterator<Item = &str> {
    text.match_indices(TOOL_CALLS_KEY).filter_map(move |(key_pos, _)| {
        let start = enclosing_open_brace(&text[..key_pos])?;
        match matching_close(text, start) {
            Some(end) => Some(&text[start..=end]),
            None if mode == ExtractMode::Complete => Some(&text[start..]),
            None => None,
        }
    })
}

fn enclosing_open_brace(prefix: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, ch) in prefix.char_indices().rev() {
        match ch {
            '}' => depth += 1,
            '{' if depth == 0 => return Some(idx),
            '{' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Index of the `}` closing the object opened at `start`, string-aware.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn object_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{[^{]*["']tool_calls["']\s*:\s*\[[^\]]*\][^}]*\}"#).ok()
    })
    .as_ref()
}

fn array_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["']tool_calls["']\s*:\s*(\[[^\]]*\])"#).ok())
        .as_ref()
}

// ─── Record Conversion ───────────────────────────────────────────────────────

fn records_from_object(value: &Value) -> Option<Vec<ToolCallRequest>> {
    records_from_array(value.get(TOOL_CALLS_KEY)?)
}

fn records_from_array(value: &Value) -> Option<Vec<ToolCallRequest>> {
    let items = value.as_array()?;
    let calls: Vec<ToolCallRequest> = items.iter().filter_map(record_to_request).collect();
    if calls.is_empty() {
        None
    } else {
        Some(assign_missing_ids(calls))
    }
}

/// Accepts `{"name", "args"}` as well as the OpenAI
/// `{"function": {"name", "arguments"}}` shape. Arguments may be a JSON string.
fn record_to_request(record: &Value) -> Option<ToolCallRequest> {
    let function = record.get("function");
    let name = record
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| function.and_then(|f| f.get("name")).and_then(Value::as_str))
        .map(str::trim)
        .filter(|n| !n.is_empty())?;

    let raw_args = record
        .get("args")
        .or_else(|| record.get("arguments"))
        .or_else(|| function.and_then(|f| f.get("arguments")));

    let arguments = match raw_args {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) if s.trim().is_empty() => Map::new(),
        Some(Value::String(s)) => match parse_lenient(s, ExtractMode::Complete)? {
            Value::Object(map) => map,
            _ => return None,
        },
        Some(_) => return None,
    };

    let id = record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(ToolCallRequest::new(id, name, arguments))
}

/// Replace empty or repeated ids so every call in the batch is distinct.
fn assign_missing_ids(mut calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    for (index, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() || seen.contains(&call.id) {
            call.id = generate_call_id(index, &call.qualified_name, &call.arguments);
        }
        seen.insert(call.id.clone());
    }
    calls
}

// ─── Lenient Parsing ─────────────────────────────────────────────────────────

/// Parse JSON, applying progressively stronger repairs until one succeeds.
///
/// In [`ExtractMode::Partial`] unterminated strings and containers are left
/// alone, so a half-written object never parses.
pub fn parse_lenient(raw: &str, mode: ExtractMode) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let mut repaired = normalize_python_syntax(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_double_quotes(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_trailing_commas(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    if mode == ExtractMode::Complete {
        repaired = repair_trailing_commas(&close_unterminated(&repaired));
        if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
            return Some(v);
        }
    }

    repaired = repair_control_characters(&repaired);
    serde_json::from_str::<Value>(&repaired).ok()
}

/// Convert single-quoted strings to double-quoted ones and Python literals
/// (`True`, `False`, `None`) to JSON, outside of existing JSON strings.
fn normalize_python_syntax(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' => {
                let end = skip_string(&chars, i, '"');
                out.extend(&chars[i..end]);
                i = end;
            }
            '\'' => {
                out.push('"');
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    match chars[i] {
                        '\\' if chars.get(i + 1) == Some(&'\'') => {
                            out.push('\'');
                            i += 2;
                            continue;
                        }
                        '\\' => {
                            out.push('\\');
                            if let Some(&next) = chars.get(i + 1) {
                                out.push(next);
                            }
                            i += 2;
                            continue;
                        }
                        '"' => out.push_str("\\\""),
                        c => out.push(c),
                    }
                    i += 1;
                }
                if i < chars.len() {
                    out.push('"');
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Index just past the string starting at `start` (or the end of input).
fn skip_string(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Fix double-quote patterns: `":""value"` → `":"value"`.
///
/// Leaves a legitimate empty string (`:""` followed by `,` `}` or `]`) alone.
fn repair_double_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if i + 3 < bytes.len()
            && bytes[i] == b':'
            && bytes[i + 1] == b'"'
            && bytes[i + 2] == b'"'
            && !matches!(bytes[i + 3], b',' | b'}' | b']' | b' ' | b'\n')
        {
            result.extend_from_slice(b":\"");
            i += 3;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(result).unwrap_or_else(|_| input.to_string())
}

/// Remove trailing commas before `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            if ch == '\\' {
                result.push(ch);
                if let Some(&next) = chars.get(i + 1) {
                    result.push(next);
                }
                i += 2;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                i += 1;
                continue;
            }
        }
        result.push(ch);
        i += 1;
    }

    result
}

/// Terminate an open string, then close open `{`/`[` in stack order.
fn close_unterminated(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = input.trim_end().to_string();
    if escape_next {
        result.pop();
    }
    if in_string {
        result.push('"');
    }
    let trimmed_len = result.trim_end().len();
    if result[..trimmed_len].ends_with(':') {
        result.truncate(trimmed_len);
        result.push_str(" null");
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Remove control characters that break JSON parsing, keeping `\n` `\r` `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
