//! Analysis records: raw collaborator output, the tagged parse result, and
//! the reconciled per-row record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::taxonomy::{Emotion, NpsCategory, PainCategory, Polarity, RiskLevel, Severity};
use super::utils::{lenient_f64, lenient_string};

// =============================================================================
// Raw Collaborator Output
// =============================================================================

/// Unvalidated analysis of one comment, as returned by a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalysisRecord {
    /// Emotion scores keyed by whatever label the collaborator used
    #[serde(default, alias = "emociones")]
    pub emotions: BTreeMap<String, serde_json::Value>,
    #[serde(default, alias = "puntos_dolor", alias = "pain_point")]
    pub pain_points: Vec<RawPainPoint>,
    #[serde(
        default,
        alias = "riesgo_churn",
        alias = "churn",
        deserialize_with = "lenient_f64"
    )]
    pub churn_risk: Option<f64>,
    #[serde(
        default,
        alias = "categoria_nps",
        alias = "nps",
        deserialize_with = "lenient_string"
    )]
    pub nps_category: Option<String>,
    #[serde(default, alias = "razonamiento", deserialize_with = "lenient_string")]
    pub reasoning: Option<String>,
}

/// A pain point as reported; collaborators send either an object or a bare string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPainPointRepr")]
pub struct RawPainPoint {
    pub description: String,
    pub category: Option<String>,
    pub severity: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPainPointRepr {
    Text(String),
    Structured {
        #[serde(default, alias = "descripcion", alias = "desc")]
        description: String,
        #[serde(default, alias = "categoria", deserialize_with = "lenient_string")]
        category: Option<String>,
        #[serde(default, alias = "severidad", deserialize_with = "lenient_string")]
        severity: Option<String>,
    },
}

impl From<RawPainPointRepr> for RawPainPoint {
    fn from(repr: RawPainPointRepr) -> Self {
        match repr {
            RawPainPointRepr::Text(description) => Self {
                description,
                ..Self::default()
            },
            RawPainPointRepr::Structured {
                description,
                category,
                severity,
            } => Self {
                description,
                category,
                severity,
            },
        }
    }
}

/// Tagged parse result handed to reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Valid(RawAnalysisRecord),
    Malformed { reason: String },
}

impl ParsedResponse {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

// =============================================================================
// Reconciled Record
// =============================================================================

/// Which generator produced the raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Collaborator,
    Synthetic,
}

/// A field overwritten during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub field: String,
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionPatterns {
    /// More than two emotions above the strong threshold
    pub mixed_emotions: bool,
    /// Strong positive and strong negative emotions at once
    pub emotional_conflict: bool,
    pub high_arousal: bool,
    /// Share of the 16 emotions that are active
    pub complexity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionProfile {
    /// `None` when every score is zero
    pub dominant: Option<Emotion>,
    /// Mean of the top-3 scores
    pub intensity: f64,
    pub category: Polarity,
    /// (positive - negative) / (positive + negative), 0 when both are zero
    pub balance: f64,
    pub patterns: EmotionPatterns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentAlignment {
    Aligned,
    Neutral,
    Misaligned,
}

impl SentimentAlignment {
    pub fn from_consistency(score: f64) -> Self {
        if score >= 0.8 {
            Self::Aligned
        } else if score >= 0.4 {
            Self::Neutral
        } else {
            Self::Misaligned
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpsAssessment {
    pub category: NpsCategory,
    /// Input score normalized to 0-10
    pub score: Option<f64>,
    /// Emotion-weighted estimate, present only when no score was supplied
    pub inferred_score: Option<f64>,
    /// Confidence of `inferred_score`, in [0.1, 0.95]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_confidence: Option<f64>,
    pub consistency_score: f64,
    pub alignment: SentimentAlignment,
}

/// Per-signal churn components, each in [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChurnComponents {
    pub collaborator: f64,
    pub sentiment: f64,
    pub keywords: f64,
    pub nps: f64,
    pub pain_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnAssessment {
    pub risk: f64,
    pub level: RiskLevel,
    pub components: ChurnComponents,
    pub factors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PainOrigin {
    Collaborator,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainPoint {
    pub description: String,
    pub category: PainCategory,
    pub severity: Severity,
    /// severity weight x category weight
    pub impact: f64,
    pub origin: PainOrigin,
}

/// Validated, corrected analysis of one comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub row_id: usize,
    pub text: String,
    /// All 16 emotions, each in [0, 1]
    pub emotions: BTreeMap<Emotion, f64>,
    pub emotion_profile: EmotionProfile,
    pub nps: NpsAssessment,
    pub churn: ChurnAssessment,
    pub pain_points: Vec<PainPoint>,
    pub pain_distribution: BTreeMap<PainCategory, usize>,
    pub corrections: Vec<Correction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub source: AnalysisSource,
}

/// Stand-in for a row whose analysis could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPlaceholder {
    pub row_id: usize,
    pub text: String,
    pub churn_risk: f64,
    pub category: String,
    pub note: String,
}

impl ErrorPlaceholder {
    pub fn new(row_id: usize, text: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            row_id,
            text: text.into(),
            churn_risk: 0.0,
            category: "unknown".to_string(),
            note: note.into(),
        }
    }
}

/// Terminal result for one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowResult {
    Analyzed(AnalysisRecord),
    Error(ErrorPlaceholder),
}

impl RowResult {
    pub fn row_id(&self) -> usize {
        match self {
            Self::Analyzed(record) => record.row_id,
            Self::Error(placeholder) => placeholder.row_id,
        }
    }

    pub fn as_analyzed(&self) -> Option<&AnalysisRecord> {
        match self {
            Self::Analyzed(record) => Some(record),
            Self::Error(_) => None,
        }
    }

    pub fn churn_risk(&self) -> f64 {
        match self {
            Self::Analyzed(record) => record.churn.risk,
            Self::Error(placeholder) => placeholder.churn_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_spanish_keys() {
        let raw: RawAnalysisRecord = serde_json::from_str(
            r#"{
                "emociones": {"alegría": 0.8, "enojo": "0.1"},
                "puntos_dolor": ["Demora en la entrega",
                                 {"descripcion": "Precio alto", "categoria": "precio", "severidad": "alta"}],
                "riesgo_churn": "0.35",
                "categoria_nps": "Promotor",
                "razonamiento": "cliente satisfecho"
            }"#,
        )
        .unwrap();

        assert_eq!(raw.emotions.len(), 2);
        assert_eq!(raw.pain_points.len(), 2);
        assert_eq!(raw.pain_points[0].description, "Demora en la entrega");
        assert!(raw.pain_points[0].category.is_none());
        assert_eq!(raw.pain_points[1].severity.as_deref(), Some("alta"));
        assert_eq!(raw.churn_risk, Some(0.35));
        assert_eq!(raw.nps_category.as_deref(), Some("Promotor"));
    }

    #[test]
    fn test_raw_record_tolerates_missing_fields() {
        let raw: RawAnalysisRecord = serde_json::from_str("{}").unwrap();
        assert!(raw.emotions.is_empty());
        assert!(raw.churn_risk.is_none());
        assert!(raw.nps_category.is_none());
    }

    #[test]
    fn test_row_result_tagging() {
        let row = RowResult::Error(ErrorPlaceholder::new(7, "texto", "batch failed"));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["category"], "unknown");
        assert_eq!(row.row_id(), 7);
        assert_eq!(row.churn_risk(), 0.0);
    }
}
