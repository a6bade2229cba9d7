//! Best-effort structured decode of model output.
//!
//! Models wrap JSON in prose or code fences, leave trailing commas, or get cut
//! off mid-object. Every call site goes through [`decode_json_object`], which
//! applies a fixed sequence of attempts:
//!
//! 1. strip a Markdown code fence, parse the remainder
//! 2. locate the first balanced `{...}` inside surrounding prose, parse it
//!    (retrying once without trailing commas)
//! 3. truncation repair: close open strings, arrays and objects; on failure
//!    cut back to the previous top-level separator, at most
//!    [`MAX_REPAIR_STEPS`] times
//! 4. give up with `TableFuseError::Parsing`

use crate::{Result, TableFuseError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Inputs longer than this (in bytes) are cut before decoding.
pub const MAX_DECODE_INPUT: usize = 512 * 1024;

/// Upper bound on cut-back attempts during truncation repair.
pub const MAX_REPAIR_STEPS: usize = 64;

/// Decode the single JSON object contained in `text`.
pub fn decode_json_object(text: &str) -> Result<Value> {
    let mut text = text.trim();
    if text.is_empty() {
        return Err(TableFuseError::parsing("Model response is empty"));
    }
    if text.len() > MAX_DECODE_INPUT {
        let mut cut = MAX_DECODE_INPUT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text = &text[..cut];
    }

    let body = strip_code_fence(text);

    if let Some(value) = parse_object(body) {
        return Ok(value);
    }

    let Some(start) = body.find('{') else {
        return Err(TableFuseError::parsing("Model response contains no JSON object"));
    };
    let fragment = &body[start..];

    if let Some(end) = balanced_object_end(fragment) {
        let candidate = &fragment[..end];
        if let Some(value) = parse_object(candidate).or_else(|| parse_object(&remove_trailing_commas(candidate))) {
            return Ok(value);
        }
    }

    if let Some(value) = repair_truncated(fragment) {
        tracing::debug!("Recovered JSON object from truncated model output");
        return Ok(value);
    }

    Err(TableFuseError::parsing(format!(
        "No JSON object could be recovered from model response ({} bytes)",
        text.len()
    )))
}

/// Decode the JSON object in `text` into `T`.
pub fn decode_as<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = decode_json_object(text)?;
    serde_json::from_value(value)
        .map_err(|e| TableFuseError::parsing_with_source("Model JSON does not match the expected shape", e))
}

/// Cell text from any JSON scalar: strings as-is, `null` as empty, numbers
/// and booleans in their JSON spelling.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `deserialize_with` helper accepting any scalar as cell text.
pub fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

/// `deserialize_with` helper for an optional row of cells.
pub fn lenient_cells<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error> {
    let cells = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(cells.map(|cells| cells.iter().map(value_to_text).collect()))
}

/// `deserialize_with` helper for optional rows of cells.
pub fn lenient_rows<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Vec<Vec<String>>>, D::Error> {
    let rows = Option::<Vec<Vec<Value>>>::deserialize(deserializer)?;
    Ok(rows.map(|rows| rows.iter().map(|row| row.iter().map(value_to_text).collect()).collect()))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Byte offset just past the `}` closing the object that starts at `fragment[0]`.
fn balanced_object_end(fragment: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in fragment.char_indices() {
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
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop commas that directly precede a closing bracket, outside strings.
fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

struct ScanState {
    stack: Vec<char>,
    in_string: bool,
    /// Byte offsets of commas outside strings.
    separators: Vec<usize>,
}

fn scan(text: &str) -> ScanState {
    let mut state = ScanState {
        stack: Vec::new(),
        in_string: false,
        separators: Vec::new(),
    };
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if state.in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => state.in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => state.in_string = true,
            '{' => state.stack.push('}'),
            '[' => state.stack.push(']'),
            '}' | ']' => {
                state.stack.pop();
            }
            ',' => state.separators.push(idx),
            _ => {}
        }
    }
    state
}

fn close_fragment(fragment: &str) -> String {
    let state = scan(fragment);
    let mut closed = fragment.to_string();
    if state.in_string {
        // A dangling backslash would escape the closing quote.
        if closed.ends_with('\\') {
            closed.pop();
        }
        closed.push('"');
    }
    let trimmed_len = closed.trim_end().len();
    closed.truncate(trimmed_len);
    while closed.ends_with(',') {
        closed.pop();
    }
    if closed.ends_with(':') {
        closed.push_str("null");
    }
    for closer in state.stack.iter().rev() {
        closed.push(*closer);
    }
    remove_trailing_commas(&closed)
}

fn repair_truncated(fragment: &str) -> Option<Value> {
    let mut current = fragment;
    for _ in 0..MAX_REPAIR_STEPS {
        if let Some(value) = parse_object(&close_fragment(current)) {
            return Some(value);
        }
        let state = scan(current);
        let cut = *state.separators.last()?;
        current = &current[..cut];
    }
    None
}
