//! Input rows handed over by the ingestion layer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::error::{LensError, Result};
use super::utils::lenient_f64;

/// One customer comment, immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    /// Stable index of the row in the original sheet
    pub row_id: usize,
    #[serde(alias = "comment", alias = "comentario")]
    pub text: String,
    /// Customer-provided NPS score; scale is normalized during reconciliation
    #[serde(
        default,
        alias = "nps",
        alias = "nota",
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub nps_input_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_note: Option<String>,
}

impl CommentRecord {
    pub fn new(row_id: usize, text: impl Into<String>) -> Self {
        Self {
            row_id,
            text: text.into(),
            nps_input_score: None,
            quality_note: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.nps_input_score = Some(score);
        self
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Pre-flight check: the set is non-empty and every row id is unique.
pub fn validate_rows(rows: &[CommentRecord]) -> Result<()> {
    if rows.is_empty() {
        return Err(LensError::input("no comment rows to analyze"));
    }
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.row_id) {
            return Err(LensError::input(format!(
                "duplicate row_id {} in input",
                row.row_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_aliases_and_lenient_score() {
        let row: CommentRecord =
            serde_json::from_str(r#"{"row_id": 3, "comentario": "Muy bueno", "nota": "9"}"#)
                .unwrap();
        assert_eq!(row.row_id, 3);
        assert_eq!(row.text, "Muy bueno");
        assert_eq!(row.nps_input_score, Some(9.0));
        assert!(row.quality_note.is_none());
    }

    #[test]
    fn test_validate_rows() {
        assert!(validate_rows(&[]).is_err());
        let rows = vec![CommentRecord::new(0, "a"), CommentRecord::new(0, "b")];
        assert!(validate_rows(&rows).is_err());
        let rows = vec![CommentRecord::new(0, "a"), CommentRecord::new(1, "b")];
        assert!(validate_rows(&rows).is_ok());
    }
}
