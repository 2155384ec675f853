//! Response Parsing
//!
//! Extracts per-comment records from a collaborator response body.
//!
//! Handles common LLM JSON output issues:
//! - Markdown code fence wrapping (```json ... ```)
//! - Wrapping objects (`{"results": [...]}`)
//! - Missing closing braces/brackets and trailing commas
//! - JSON embedded in explanatory text
//!
//! A body that cannot be parsed at all is a retryable `ParseError`; an item
//! that parses but is not a usable record becomes `ParsedResponse::Malformed`.

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ErrorCategory, LlmError, ParsedResponse, RawAnalysisRecord};

/// Keys under which collaborators nest the result array
const WRAPPER_KEYS: &[&str] = &[
    "results",
    "resultados",
    "analyses",
    "analisis",
    "comentarios",
    "comments",
    "data",
    "items",
];

/// Split a response body into one parsed entry per returned item.
pub fn parse_batch_response(content: &str) -> Result<Vec<ParsedResponse>, LlmError> {
    let value = JsonRepairer::new().parse_or_repair(content)?;
    let items = extract_items(value)?;
    Ok(items.into_iter().map(parse_item).collect())
}

fn extract_items(value: Value) -> Result<Vec<Value>, LlmError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            if let Some(key) = WRAPPER_KEYS
                .iter()
                .find(|key| map.get(**key).is_some_and(Value::is_array))
                && let Some(Value::Array(items)) = map.remove(*key)
            {
                return Ok(items);
            }
            if map.contains_key("emotions") || map.contains_key("emociones") {
                warn!("Response is a single record, wrapping in array");
                return Ok(vec![Value::Object(map)]);
            }
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => Ok(items),
                _ => Err(LlmError::new(
                    ErrorCategory::ParseError,
                    "response object has no result array",
                )),
            }
        }
        other => Err(LlmError::new(
            ErrorCategory::ParseError,
            format!("expected a JSON array of records, got {}", type_name(&other)),
        )),
    }
}

fn parse_item(item: Value) -> ParsedResponse {
    if !item.is_object() {
        return ParsedResponse::malformed(format!("item is {}, not an object", type_name(&item)));
    }
    match serde_json::from_value::<RawAnalysisRecord>(item) {
        Ok(record)
            if record.emotions.is_empty()
                && record.churn_risk.is_none()
                && record.nps_category.is_none()
                && record.pain_points.is_empty() =>
        {
            ParsedResponse::malformed("record carries no analysis fields")
        }
        Ok(record) => ParsedResponse::Valid(record),
        Err(e) => ParsedResponse::malformed(format!("invalid record: {}", e)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// JsonRepairer
// =============================================================================

/// JSON extraction with light repair
#[derive(Debug, Default)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    /// Parse JSON, attempting repair if the initial parse fails
    pub fn parse_or_repair(&self, raw: &str) -> Result<Value, LlmError> {
        let cleaned = self.preprocess(raw);

        if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
            return Ok(value);
        }

        debug!("Initial JSON parse failed, attempting repair");
        let repaired = self.fix_trailing_commas(&self.balance_brackets(&cleaned));
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            warn!("JSON repaired");
            return Ok(value);
        }

        if let Some(extracted) = self.extract_json_from_mixed(&cleaned)
            && let Ok(value) = serde_json::from_str::<Value>(&extracted)
        {
            warn!("JSON extracted from mixed content");
            return Ok(value);
        }

        Err(LlmError::new(
            ErrorCategory::ParseError,
            format!(
                "failed to parse JSON response. Content preview: {}...",
                cleaned.chars().take(200).collect::<String>()
            ),
        ))
    }

    fn preprocess(&self, raw: &str) -> String {
        let s = self.strip_code_fences(raw.trim());
        s.trim_start_matches('\u{feff}').trim().to_string()
    }

    fn strip_code_fences(&self, s: &str) -> String {
        let mut result = s.to_string();
        if result.starts_with("```")
            && let Some(first_newline) = result.find('\n')
        {
            result = result[first_newline + 1..].to_string();
        }
        if result.ends_with("```") {
            result = result[..result.len() - 3].trim_end().to_string();
        }
        result
    }

    /// Drop commas directly before `]` or `}`
    fn fix_trailing_commas(&self, s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        let mut result = String::with_capacity(s.len());

        for (i, ch) in chars.iter().enumerate() {
            if *ch == ',' {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next, Some(']') | Some('}')) {
                    continue;
                }
            }
            result.push(*ch);
        }
        result
    }

    /// Append closers for unbalanced strings, arrays and objects
    fn balance_brackets(&self, s: &str) -> String {
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => stack.push('}'),
                '[' if !in_string => stack.push(']'),
                '}' | ']' if !in_string => {
                    stack.pop();
                }
                _ => {}
            }
        }

        let mut result = s.to_string();
        if in_string {
            result.push('"');
        }
        while let Some(closer) = stack.pop() {
            result.push(closer);
        }
        result
    }

    /// First complete array or object embedded in surrounding text
    fn extract_json_from_mixed(&self, s: &str) -> Option<String> {
        let start = s.find(['{', '['])?;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;

        for (i, ch) in s[start..].char_indices() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' | '[' if !in_string => depth += 1,
                '}' | ']' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(s[start..start + i + 1].to_string());
                    }
                }
                _ => {}
            }
        }
        None
    }
}
