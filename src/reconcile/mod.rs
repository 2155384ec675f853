//! Result Reconciliation
//!
//! Turns a [`ParsedResponse`] for one comment into a terminal [`RowResult`]:
//! validated emotions, a consistent NPS category, a churn composite and
//! ranked pain points, with every overwritten field listed as a correction.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::reconcile::Reconciler;
//!
//! let reconciler = Reconciler::new(&config);
//! let row = reconciler.reconcile(parsed, &comment, AnalysisSource::Collaborator);
//! ```
//!
//! Each sub-module is a pure function of the raw record, the comment and
//! configuration; the same input always yields the same record.

pub mod churn;
pub mod emotion;
pub mod nps;
pub mod pain_points;

pub use churn::{ChurnInsights, ChurnSignals, assess_churn};
pub use emotion::{EmotionInsights, reconcile_emotions};
pub use nps::{NpsInsights, normalize_score, reconcile_nps};
pub use pain_points::{PainInsights, reconcile_pain_points};

use crate::config::{Config, ReconcileConfig};
use crate::types::{
    AnalysisRecord, AnalysisSource, CommentRecord, ErrorPlaceholder, ParsedResponse,
    RawAnalysisRecord, RowResult, normalize_whitespace,
};

/// Stateless reconciler configured once per run.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.reconcile.clone(),
        }
    }

    pub fn reconcile(
        &self,
        parsed: ParsedResponse,
        comment: &CommentRecord,
        source: AnalysisSource,
    ) -> RowResult {
        match parsed {
            ParsedResponse::Valid(raw) => {
                RowResult::Analyzed(self.reconcile_record(raw, comment, source))
            }
            ParsedResponse::Malformed { reason } => {
                tracing::warn!(row_id = comment.row_id, reason = %reason, "Malformed analysis");
                RowResult::Error(ErrorPlaceholder::new(
                    comment.row_id,
                    comment.text.clone(),
                    format!("malformed analysis: {}", reason),
                ))
            }
        }
    }

    pub fn reconcile_record(
        &self,
        raw: RawAnalysisRecord,
        comment: &CommentRecord,
        source: AnalysisSource,
    ) -> AnalysisRecord {
        let emotions = reconcile_emotions(&raw.emotions);
        let nps = reconcile_nps(
            raw.nps_category.as_deref(),
            comment.nps_input_score,
            &emotions.scores,
            &comment.text,
            raw.churn_risk,
        );
        let pain = reconcile_pain_points(&raw.pain_points, &comment.text, &self.config.pain_points);
        let churn = assess_churn(
            &ChurnSignals {
                collaborator_risk: raw.churn_risk,
                text: &comment.text,
                emotions: &emotions.scores,
                profile: &emotions.profile,
                nps: &nps.assessment,
                pain_points: &pain.points,
            },
            &self.config.churn,
        );

        let mut corrections = emotions.corrections;
        corrections.extend(nps.corrections);
        corrections.extend(churn.corrections);
        if !corrections.is_empty() {
            tracing::debug!(
                row_id = comment.row_id,
                corrections = corrections.len(),
                "Applied corrections"
            );
        }

        let reasoning = raw
            .reasoning
            .map(|r| normalize_whitespace(&r))
            .filter(|r| !r.is_empty());

        AnalysisRecord {
            row_id: comment.row_id,
            text: comment.text.clone(),
            emotions: emotions.scores,
            emotion_profile: emotions.profile,
            nps: nps.assessment,
            churn: churn.assessment,
            pain_points: pain.points,
            pain_distribution: pain.distribution,
            corrections,
            reasoning,
            source,
        }
    }
}
