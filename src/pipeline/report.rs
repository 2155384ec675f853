//! Aggregate report over a finished run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::run::{PerformanceSummary, PipelineRun, RunStatus};
use crate::ai::{AlertEvent, UsageTotals};
use crate::reconcile::{ChurnInsights, EmotionInsights, NpsInsights, PainInsights};
use crate::reconcile::{churn, emotion, nps, pain_points};
use crate::types::{RowResult, RunId};

#[derive(Debug, Clone, Serialize)]
pub struct RowCounts {
    pub total: usize,
    pub analyzed: usize,
    pub errored: usize,
}

/// Read-only summary handed to the reporting side; serializable as JSON or YAML.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub generated_at: DateTime<Utc>,
    pub rows: RowCounts,
    pub emotions: EmotionInsights,
    pub nps: NpsInsights,
    pub churn: ChurnInsights,
    pub pain_points: PainInsights,
    pub usage: UsageTotals,
    pub alerts: Vec<AlertEvent>,
    pub recommendations: Vec<String>,
    pub performance: PerformanceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<RowResult>,
}

impl PipelineReport {
    /// Aggregate insights cover analyzed rows only; placeholders are counted
    /// under `rows.errored`.
    pub fn build(run: &PipelineRun, alerts: Vec<AlertEvent>, recommendations: Vec<String>) -> Self {
        let analyzed: Vec<_> = run.analyzed().collect();

        let emotions =
            emotion::aggregate(analyzed.iter().map(|r| (&r.emotions, &r.emotion_profile)));
        let nps = nps::aggregate(analyzed.iter().map(|r| {
            let corrected = r.corrections.iter().any(|c| c.field == "nps_category");
            (&r.nps, corrected)
        }));
        let churn = churn::aggregate(analyzed.iter().map(|r| r.churn.risk));
        let pain_points = pain_points::aggregate(analyzed.iter().map(|r| r.pain_points.as_slice()));

        Self {
            run_id: run.run_id,
            status: run.status,
            generated_at: Utc::now(),
            rows: RowCounts {
                total: run.results.len(),
                analyzed: analyzed.len(),
                errored: run.errored(),
            },
            emotions,
            nps,
            churn,
            pain_points,
            usage: run.usage.clone(),
            alerts,
            recommendations,
            performance: run.performance.clone(),
            error: run.error.clone(),
            results: run.results.clone(),
        }
    }

    pub fn to_json(&self) -> crate::types::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> crate::types::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
