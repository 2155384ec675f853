//! Shared helpers for lenient parsing of collaborator output and text handling.
//!
//! ## Lenient Deserializers
//!
//! LLM output is not trusted to carry the right JSON types. These helpers
//! accept numbers, numeric strings, or `null` wherever a float is expected:
//! - `lenient_f64` - `Option<f64>` field deserializer
//! - `value_as_f64` - Extract a float from an arbitrary `serde_json::Value`

use serde::{Deserialize, Deserializer};

// =============================================================================
// Lenient Numbers
// =============================================================================

/// Extract a float from a JSON value that may be a number or a numeric string.
///
/// Percent strings ("75%") are read as fractions.
pub fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
                None => trimmed.replace(',', ".").parse::<f64>().ok(),
            }
        }
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `deserialize_with` helper for `Option<f64>` fields fed by an LLM.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

/// `deserialize_with` helper for optional string fields that may arrive as numbers.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Clamp to [0, 1], mapping non-finite values to 0.
#[inline]
pub fn unit_clamp(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// =============================================================================
// Text Utilities
// =============================================================================

/// Collapse whitespace runs into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and fold Spanish diacritics so "Frustración" matches "frustracion".
pub fn fold_key(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Type Parsing
// =============================================================================

/// Parse strings into taxonomy enums with a logged fallback.
///
/// Collaborator output uses Spanish and English labels interchangeably;
/// unknown labels fall back to a default instead of failing the record.
pub trait ParseWithDefault: Sized {
    fn type_name() -> &'static str;

    fn default_value() -> Self;

    fn try_parse(s: &str) -> Option<Self>;

    fn parse_or_default(s: &str) -> Self {
        match Self::try_parse(s) {
            Some(v) => v,
            None => {
                tracing::warn!("Invalid {} value '{}', using default", Self::type_name(), s);
                Self::default_value()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_f64() {
        assert_eq!(value_as_f64(&json!(0.4)), Some(0.4));
        assert_eq!(value_as_f64(&json!("0,7")), Some(0.7));
        assert_eq!(value_as_f64(&json!("75%")), Some(0.75));
        assert_eq!(value_as_f64(&json!("high")), None);
        assert_eq!(value_as_f64(&json!(null)), None);
    }

    #[test]
    fn test_unit_clamp() {
        assert_eq!(unit_clamp(1.7), 1.0);
        assert_eq!(unit_clamp(-0.2), 0.0);
        assert_eq!(unit_clamp(f64::NAN), 0.0);
        assert_eq!(unit_clamp(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_fold_key() {
        assert_eq!(fold_key(" Frustración "), "frustracion");
        assert_eq!(fold_key("VERGÜENZA"), "verguenza");
        assert_eq!(fold_key("Alegría"), "alegria");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("atención", 6), "atenci");
        assert_eq!(truncate_chars("corto", 10), "corto");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  muy \n\t lento  "), "muy lento");
    }
}
