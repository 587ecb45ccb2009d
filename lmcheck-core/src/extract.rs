//! Recovery of a single JSON value from free-form model output.
//!
//! Models are asked for bare JSON but routinely wrap it in prose or code
//! fences, or emit near-JSON (single quotes, unquoted keys, trailing commas).
//! [`extract_json`] slices out the first JSON-looking value and repairs it
//! before parsing. A `None` result means "ask again", never a fatal error.

use serde_json::Value;

/// Extract, repair and parse the JSON value embedded in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let slice = json_slice(text);
    if slice.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(slice) {
        return Some(value);
    }

    let repaired = repair_json(slice);
    match serde_json::from_str(&repaired) {
        Ok(value) => {
            tracing::debug!("parsed model output after repair");
            Some(value)
        }
        Err(e) => {
            tracing::debug!("failed to repair and parse model output: {}", e);
            None
        }
    }
}

/// Locate the JSON part of `text`.
///
/// Starts at the earliest `{` or `[` and ends at its balancing closer, found
/// by a depth scan that ignores brackets inside string literals. When the
/// scan never balances, the slice ends at the last occurrence of the
/// matching closer, or runs to the end of the text if there is none. Text
/// without any opener is returned unchanged.
pub fn json_slice(text: &str) -> &str {
    let text = strip_fences(text.trim());

    let Some(start) = text.find(&['{', '['][..]) else {
        return text;
    };
    let close = if text[start..].starts_with('{') { '}' } else { ']' };

    if let Some(end) = balanced_end(&text[start..]) {
        return &text[start..start + end];
    }

    match text.rfind(close) {
        Some(end) if end > start => &text[start..=end],
        _ => &text[start..],
    }
}

/// Remove code fences wrapping the whole text.
fn strip_fences(text: &str) -> &str {
    let mut text = text;

    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        text = if let Some(body) = after_tag.strip_prefix("\r\n") {
            body
        } else if let Some(body) = after_tag.strip_prefix('\n') {
            body
        } else {
            rest
        };
    }

    if let Some(body) = text.strip_suffix("```") {
        text = body;
    }

    text.trim()
}

/// Byte length of the balanced value at the start of `text`, if it closes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Best-effort structural repair of near-JSON text.
///
/// Handles single-quoted strings, unquoted keys and bare words, trailing
/// commas, `//` and `/* */` comments, Python literals, raw newlines inside
/// strings, and containers or strings left open by a truncated reply.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let (next, closed) = copy_string(&chars, i, &mut out);
                if !closed {
                    // A truncated reply may end inside a string.
                    out.push('"');
                }
                i = next;
                continue;
            }
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            ',' => {
                let next = next_significant(&chars, i + 1);
                if matches!(next, None | Some('}') | Some(']')) {
                    i += 1;
                    continue;
                }
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                continue;
            }
            c if c.is_ascii_digit() || c == '-' => {
                while i < chars.len() && is_number_char(chars[i]) {
                    out.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" | "undefined" => out.push_str("null"),
                    _ => {
                        out.push('"');
                        push_escaped(&mut out, &word);
                        out.push('"');
                    }
                }
                continue;
            }
            _ => {}
        }
        out.push(c);
        i += 1;
    }

    // Unclosed containers from a truncated reply.
    while out.ends_with(|c: char| c.is_whitespace() || c == ',') {
        out.pop();
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    out
}

/// Copy the string literal starting at `start` as a double-quoted JSON
/// string. Returns the index after the literal and whether it was closed.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> (usize, bool) {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                if next == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(next);
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return (i + 1, true);
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }

    (i, false)
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}
