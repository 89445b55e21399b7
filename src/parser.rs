//! Structured data extraction from free-form model text.
//!
//! A parse attempt decodes the raw text directly. If that fails it runs one
//! repair pass (fence stripping, bracket extraction) and decodes once more.
//! There is never a second repair.

use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::SchemaViolation;
use crate::schema::Schema;

/// Opening code fence with optional language tag, up to the closing fence or end of text.
static CODE_FENCE_REGEX: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)(?:```|$)")
        .expect("Invalid code fence regex")
});

/// Schema name reported for list calls made without an item schema.
const UNTYPED_LIST: &str = "list";

/// Valid list items plus the count of items dropped by validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedList {
    pub items: Vec<Value>,
    pub skipped_count: usize,
}

pub struct OutputParser;

impl OutputParser {
    /// Decode a single object and validate it against `schema`.
    pub fn parse_object(raw_text: &str, schema: &Schema) -> Result<Value, SchemaViolation> {
        let first_reason = match decode_validated(raw_text, schema) {
            Ok(value) => return Ok(value),
            Err(reason) => reason,
        };

        let Some(repaired) = repair(raw_text) else {
            return Err(violation(schema.name(), first_reason, raw_text));
        };
        debug!(
            schema = %schema.name(),
            reason = %first_reason,
            "Direct decode failed, retrying after repair"
        );

        decode_validated(&repaired, schema)
            .map_err(|reason| violation(schema.name(), reason, raw_text))
    }

    /// Decode a sequence and validate each item on its own.
    ///
    /// Invalid items are dropped and counted; only an undecodable outer
    /// sequence is a violation.
    pub fn parse_list(
        raw_text: &str,
        item_schema: Option<&Schema>,
    ) -> Result<ParsedList, SchemaViolation> {
        let schema_name = item_schema.map_or(UNTYPED_LIST, Schema::name);

        let values = match decode_sequence(raw_text) {
            Ok(values) => values,
            Err(first_reason) => {
                let Some(repaired) = repair(raw_text) else {
                    return Err(violation(schema_name, first_reason, raw_text));
                };
                debug!(
                    schema = %schema_name,
                    reason = %first_reason,
                    "Direct list decode failed, retrying after repair"
                );
                decode_sequence(&repaired)
                    .map_err(|reason| violation(schema_name, reason, raw_text))?
            }
        };

        let total = values.len();
        let mut items = Vec::with_capacity(total);
        for (index, value) in values.into_iter().enumerate() {
            let verdict = match item_schema {
                Some(schema) => schema.validate(&value),
                None => Ok(()),
            };
            match verdict {
                Ok(()) => items.push(value),
                Err(reason) => {
                    debug!(
                        schema = %schema_name,
                        index,
                        reason = %reason,
                        "Dropping invalid list item"
                    );
                }
            }
        }

        Ok(ParsedList {
            skipped_count: total - items.len(),
            items,
        })
    }
}

/// Best-effort cleanup of model output before a second decode.
///
/// Strips a surrounding code fence, then extracts the text from the first
/// `{` or `[` to its matching closer. Returns `None` when no structural
/// character exists at all.
pub fn repair(raw_text: &str) -> Option<String> {
    let unfenced = match CODE_FENCE_REGEX.captures(raw_text) {
        Some(captures) => captures.get(1).map_or("", |m| m.as_str()),
        None => raw_text,
    };
    let trimmed = unfenced.trim();

    let start = trimmed.find(['{', '['])?;
    let candidate = &trimmed[start..];
    let end = matching_close(candidate).or_else(|| {
        let closer = if candidate.starts_with('{') { '}' } else { ']' };
        candidate.rfind(closer)
    })?;

    Some(candidate[..=end].to_string())
}

/// Byte index of the bracket closing the one at position 0.
///
/// String literals and escapes are honoured so brackets inside values do not count.
fn matching_close(text: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
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
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn decode_validated(text: &str, schema: &Schema) -> Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    schema.validate(&value)?;
    Ok(value)
}

fn decode_sequence(text: &str) -> Result<Vec<Value>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    match value {
        Value::Array(items) => Ok(items),
        // Models often wrap the list: {"recipes": [...]}
        Value::Object(map) => {
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Ok(items),
                _ => Err("expected a JSON array".to_string()),
            }
        }
        _ => Err("expected a JSON array".to_string()),
    }
}

fn violation(schema: &str, reason: String, raw_text: &str) -> SchemaViolation {
    SchemaViolation {
        schema: schema.to_string(),
        reason,
        raw_text: raw_text.to_string(),
    }
}
