//! Churn risk composite.
//!
//! Blends five signals into one risk score:
//!
//! | Signal        | Source                                     |
//! |---------------|--------------------------------------------|
//! | collaborator  | `churn_risk` reported by the collaborator  |
//! | sentiment     | emotional balance of the comment           |
//! | keywords      | cancellation / dissatisfaction phrases     |
//! | nps           | reconciled NPS category and consistency    |
//! | pain_points   | highest pain point severity                |
//!
//! Weights come from [`ChurnConfig`] and sum to 1.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ChurnConfig;
use crate::types::{
    ChurnAssessment, ChurnComponents, Correction, Emotion, EmotionProfile, NpsAssessment,
    NpsCategory, PainPoint, Polarity, RiskLevel, fold_key, unit_clamp,
};

/// Collaborator churn assumed when none was reported
const DEFAULT_COLLABORATOR_RISK: f64 = 0.5;

const HIGH_KEYWORD_STEP: f64 = 0.3;
const MEDIUM_KEYWORD_STEP: f64 = 0.1;

/// Score above which a negative emotion counts as high
const HIGH_NEGATIVE: f64 = 0.6;

/// Average positive score below which positive emotions count as low
const LOW_POSITIVE: f64 = 0.2;

const MULTIPLE_PAIN_POINTS: usize = 3;

const KEY_NEGATIVE: [Emotion; 4] = [
    Emotion::Enojo,
    Emotion::Frustracion,
    Emotion::Decepcion,
    Emotion::Tristeza,
];

const KEY_POSITIVE: [Emotion; 4] = [
    Emotion::Alegria,
    Emotion::Gratitud,
    Emotion::Entusiasmo,
    Emotion::Esperanza,
];

/// Inputs of the composite, all already reconciled except the collaborator risk.
#[derive(Debug, Clone, Copy)]
pub struct ChurnSignals<'a> {
    pub collaborator_risk: Option<f64>,
    pub text: &'a str,
    pub emotions: &'a BTreeMap<Emotion, f64>,
    pub profile: &'a EmotionProfile,
    pub nps: &'a NpsAssessment,
    pub pain_points: &'a [PainPoint],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChurnOutcome {
    pub assessment: ChurnAssessment,
    pub corrections: Vec<Correction>,
}

// =============================================================================
// Components
// =============================================================================

fn count_hits(folded: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|k| {
            let key = fold_key(k);
            !key.is_empty() && folded.contains(&key)
        })
        .count()
}

/// +0.3 per high-risk phrase and +0.1 per medium-risk phrase, capped at 1.
pub fn keyword_signal(text: &str, config: &ChurnConfig) -> f64 {
    let folded = fold_key(text);
    let high = count_hits(&folded, &config.high_risk_keywords) as f64;
    let medium = count_hits(&folded, &config.medium_risk_keywords) as f64;
    (high * HIGH_KEYWORD_STEP + medium * MEDIUM_KEYWORD_STEP).min(1.0)
}

/// Maps emotional balance [-1, 1] onto risk [1, 0].
pub fn sentiment_signal(profile: &EmotionProfile) -> f64 {
    unit_clamp((1.0 - profile.balance) / 2.0)
}

/// Category base risk raised by inconsistency between category and evidence.
pub fn nps_signal(nps: &NpsAssessment) -> f64 {
    let base = match nps.category {
        NpsCategory::Detractor => 0.8,
        NpsCategory::Passive => 0.4,
        NpsCategory::Promoter => 0.1,
    };
    unit_clamp(base + (1.0 - nps.consistency_score) * 0.2)
}

pub fn pain_signal(points: &[PainPoint]) -> f64 {
    points
        .iter()
        .map(|p| p.severity.weight())
        .fold(0.0, f64::max)
}

fn risk_factors(signals: &ChurnSignals<'_>, config: &ChurnConfig) -> Vec<String> {
    let folded = fold_key(signals.text);
    let score = |e: &Emotion| signals.emotions.get(e).copied().unwrap_or(0.0);
    let mut factors = Vec::new();

    if count_hits(&folded, &config.high_risk_keywords) > 0 {
        factors.push("explicit_cancellation_intent");
    }
    if count_hits(&folded, &config.medium_risk_keywords) > 0 {
        factors.push("dissatisfaction_indicators");
    }
    if signals.profile.category == Polarity::Negative {
        factors.push("negative_sentiment");
    }
    if KEY_NEGATIVE.iter().filter(|e| score(*e) > HIGH_NEGATIVE).count() >= 2 {
        factors.push("high_negative_emotions");
    }
    if KEY_POSITIVE.iter().map(score).sum::<f64>() / (KEY_POSITIVE.len() as f64) < LOW_POSITIVE {
        factors.push("low_positive_emotions");
    }
    if signals.nps.category == NpsCategory::Detractor {
        factors.push("detractor_nps");
    }
    if signals.pain_points.len() >= MULTIPLE_PAIN_POINTS {
        factors.push("multiple_pain_points");
    }

    factors.into_iter().map(str::to_string).collect()
}

// =============================================================================
// Composite
// =============================================================================

/// Weighted churn risk with its components, band and risk factors.
pub fn assess_churn(signals: &ChurnSignals<'_>, config: &ChurnConfig) -> ChurnOutcome {
    let mut corrections = Vec::new();

    let collaborator = match signals.collaborator_risk {
        Some(raw) if raw.is_finite() && (0.0..=1.0).contains(&raw) => raw,
        Some(raw) => {
            let clamped = if raw.is_finite() {
                raw.clamp(0.0, 1.0)
            } else {
                DEFAULT_COLLABORATOR_RISK
            };
            corrections.push(Correction {
                field: "churn_risk".to_string(),
                from: raw.to_string(),
                to: clamped.to_string(),
                reason: "collaborator churn outside [0, 1]".to_string(),
            });
            clamped
        }
        None => DEFAULT_COLLABORATOR_RISK,
    };

    let components = ChurnComponents {
        collaborator,
        sentiment: sentiment_signal(signals.profile),
        keywords: keyword_signal(signals.text, config),
        nps: nps_signal(signals.nps),
        pain_points: pain_signal(signals.pain_points),
    };

    let w = &config.weights;
    let total = w.total();
    let weighted = w.collaborator * components.collaborator
        + w.sentiment * components.sentiment
        + w.keywords * components.keywords
        + w.nps * components.nps
        + w.pain_points * components.pain_points;
    let risk = if total > 0.0 {
        unit_clamp(weighted / total)
    } else {
        collaborator
    };

    ChurnOutcome {
        assessment: ChurnAssessment {
            risk,
            level: RiskLevel::from_score(risk),
            components,
            factors: risk_factors(signals, config),
        },
        corrections,
    }
}

// =============================================================================
// Dataset Aggregates
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChurnInsights {
    pub total: usize,
    pub distribution: BTreeMap<RiskLevel, usize>,
    /// Share of each band, in percent
    pub distribution_pct: BTreeMap<RiskLevel, f64>,
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Comments in the high or critical band
    pub at_risk: usize,
}

pub fn aggregate(risks: impl IntoIterator<Item = f64>) -> ChurnInsights {
    let mut sorted: Vec<f64> = risks.into_iter().collect();
    if sorted.is_empty() {
        return ChurnInsights::default();
    }
    sorted.sort_by(f64::total_cmp);

    let total = sorted.len();
    let mut distribution = BTreeMap::new();
    for risk in &sorted {
        *distribution.entry(RiskLevel::from_score(*risk)).or_insert(0) += 1;
    }
    let distribution_pct = distribution
        .iter()
        .map(|(level, count)| (*level, *count as f64 / total as f64 * 100.0))
        .collect();
    let at_risk = distribution
        .iter()
        .filter(|(level, _)| **level >= RiskLevel::High)
        .map(|(_, count)| *count)
        .sum();

    ChurnInsights {
        total,
        distribution,
        distribution_pct,
        average: sorted.iter().sum::<f64>() / total as f64,
        median: sorted[total / 2],
        min: sorted[0],
        max: sorted[total - 1],
        at_risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::emotion::profile;
    use crate::types::{PainCategory, PainOrigin, SentimentAlignment, Severity};
    use proptest::prelude::*;

    fn emotions(pairs: &[(Emotion, f64)]) -> BTreeMap<Emotion, f64> {
        let mut map: BTreeMap<Emotion, f64> = Emotion::ALL.iter().map(|e| (*e, 0.0)).collect();
        map.extend(pairs.iter().copied());
        map
    }

    fn nps(category: NpsCategory, consistency: f64) -> NpsAssessment {
        NpsAssessment {
            category,
            score: None,
            inferred_score: None,
            inference_confidence: None,
            consistency_score: consistency,
            alignment: SentimentAlignment::from_consistency(consistency),
        }
    }

    fn pain(severity: Severity) -> PainPoint {
        PainPoint {
            description: "x".to_string(),
            category: PainCategory::Servicio,
            severity,
            impact: severity.weight() * 0.9,
            origin: PainOrigin::Text,
        }
    }

    #[test]
    fn test_keyword_signal() {
        let config = ChurnConfig::default();
        assert_eq!(keyword_signal("todo bien", &config), 0.0);
        assert!((keyword_signal("Voy a CANCELAR", &config) - 0.3).abs() < 1e-9);
        assert!((keyword_signal("frustrado, voy a cancelar", &config) - 0.4).abs() < 1e-9);
        let flood = "cancelar, nunca más, odio, detesto, terrible, horrible";
        assert_eq!(keyword_signal(flood, &config), 1.0);
    }

    #[test]
    fn test_angry_detractor_is_high_risk() {
        let config = ChurnConfig::default();
        let scores = emotions(&[(Emotion::Enojo, 0.9), (Emotion::Frustracion, 0.8)]);
        let profile = profile(&scores);
        let nps = nps(NpsCategory::Detractor, 1.0);
        let points = vec![pain(Severity::Critica), pain(Severity::Alta), pain(Severity::Media)];
        let signals = ChurnSignals {
            collaborator_risk: Some(0.9),
            text: "Pésimo servicio, voy a cancelar",
            emotions: &scores,
            profile: &profile,
            nps: &nps,
            pain_points: &points,
        };

        let outcome = assess_churn(&signals, &config);
        let churn = outcome.assessment;
        assert!(outcome.corrections.is_empty());
        assert!(churn.risk >= 0.6, "risk was {}", churn.risk);
        assert!(churn.level >= RiskLevel::High);
        assert_eq!(churn.components.pain_points, 1.0);
        for factor in [
            "explicit_cancellation_intent",
            "negative_sentiment",
            "high_negative_emotions",
            "low_positive_emotions",
            "detractor_nps",
            "multiple_pain_points",
        ] {
            assert!(churn.factors.iter().any(|f| f == factor), "missing {}", factor);
        }
    }

    #[test]
    fn test_happy_promoter_is_low_risk() {
        let config = ChurnConfig::default();
        let scores = emotions(&[(Emotion::Alegria, 0.9), (Emotion::Gratitud, 0.8)]);
        let profile = profile(&scores);
        let nps = nps(NpsCategory::Promoter, 1.0);
        let signals = ChurnSignals {
            collaborator_risk: Some(0.05),
            text: "Excelente atención",
            emotions: &scores,
            profile: &profile,
            nps: &nps,
            pain_points: &[],
        };

        let churn = assess_churn(&signals, &config).assessment;
        assert!(churn.risk < 0.3, "risk was {}", churn.risk);
        assert_eq!(churn.level, RiskLevel::Low);
        assert!(churn.factors.is_empty());
    }

    #[test]
    fn test_out_of_range_collaborator_risk_is_corrected() {
        let config = ChurnConfig::default();
        let scores = emotions(&[]);
        let profile = profile(&scores);
        let nps = nps(NpsCategory::Passive, 1.0);
        let signals = ChurnSignals {
            collaborator_risk: Some(3.0),
            text: "",
            emotions: &scores,
            profile: &profile,
            nps: &nps,
            pain_points: &[],
        };

        let outcome = assess_churn(&signals, &config);
        assert_eq!(outcome.assessment.components.collaborator, 1.0);
        assert_eq!(outcome.corrections[0].field, "churn_risk");
    }

    #[test]
    fn test_aggregate_churn() {
        let insights = aggregate([0.1, 0.5, 0.9, 0.7, 0.2]);
        assert_eq!(insights.total, 5);
        assert_eq!(insights.distribution[&RiskLevel::Low], 2);
        assert_eq!(insights.distribution[&RiskLevel::Critical], 1);
        assert_eq!(insights.at_risk, 2);
        assert_eq!(insights.median, 0.5);
        assert_eq!(insights.min, 0.1);
        assert_eq!(insights.max, 0.9);
        assert!((insights.average - 0.48).abs() < 1e-9);
        assert_eq!(aggregate(Vec::new()), ChurnInsights::default());
    }

    proptest! {
        #[test]
        fn prop_risk_in_unit_range(
            values in proptest::collection::vec(0.0f64..=1.0, 16),
            collaborator in -5.0f64..5.0,
            consistency in 0.0f64..=1.0,
        ) {
            let config = ChurnConfig::default();
            let scores: BTreeMap<Emotion, f64> = Emotion::ALL.iter().copied().zip(values).collect();
            let profile = profile(&scores);
            let nps = nps(NpsCategory::Detractor, consistency);
            let signals = ChurnSignals {
                collaborator_risk: Some(collaborator),
                text: "cancelar frustrado",
                emotions: &scores,
                profile: &profile,
                nps: &nps,
                pain_points: &[],
            };
            let churn = assess_churn(&signals, &config).assessment;
            prop_assert!((0.0..=1.0).contains(&churn.risk));
            prop_assert_eq!(churn.level, RiskLevel::from_score(churn.risk));
        }
    }
}
