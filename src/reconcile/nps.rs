//! NPS reconciliation.
//!
//! Checks the collaborator's NPS category against the customer's score (or,
//! without a score, against the sentiment of the comment) and corrects
//! categories the evidence cannot support.
//!
//! ## Tolerance
//!
//! | Score | Admitted categories   |
//! |-------|-----------------------|
//! | 9-10  | Promoter              |
//! | 7-8   | Passive, Promoter     |
//! | 5-6   | Passive, Detractor    |
//! | 0-4   | Detractor             |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::emotion::polarity_sums;
use crate::types::{
    Correction, Emotion, NpsAssessment, NpsCategory, Polarity, SentimentAlignment, fold_key,
};

const POSITIVE_KEYWORDS: &[&str] = &[
    "excelente",
    "bueno",
    "fantastico",
    "perfecto",
    "recomiendo",
    "feliz",
    "satisfecho",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "malo", "terrible", "horrible", "pesimo", "cancelar", "problema", "quejas",
];

/// Weight added to a polarity per keyword hit
const KEYWORD_WEIGHT: f64 = 0.2;

/// Margin one polarity needs over the other to decide the sentiment
const SENTIMENT_MARGIN: f64 = 1.2;

// =============================================================================
// Score Handling
// =============================================================================

/// Bring an input score onto the 0-10 scale.
///
/// Values in (0, 1) are read as a 0-1 scale and values in (10, 100] as a
/// 0-100 scale. Anything else outside [0, 10] is clamped.
pub fn normalize_score(raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    let score = if raw > 0.0 && raw < 1.0 {
        raw * 10.0
    } else if (0.0..=10.0).contains(&raw) {
        raw
    } else if raw > 10.0 && raw <= 100.0 {
        raw / 10.0
    } else {
        raw.clamp(0.0, 10.0)
    };
    Some(score)
}

/// Categories a given score tolerates.
pub fn admitted_categories(score: f64) -> &'static [NpsCategory] {
    if score >= 9.0 {
        &[NpsCategory::Promoter]
    } else if score >= 7.0 {
        &[NpsCategory::Passive, NpsCategory::Promoter]
    } else if score >= 5.0 {
        &[NpsCategory::Passive, NpsCategory::Detractor]
    } else {
        &[NpsCategory::Detractor]
    }
}

/// 1 - |rank difference| / 2
pub fn rank_consistency(reported: NpsCategory, expected: NpsCategory) -> f64 {
    let diff = (reported.rank() as f64 - expected.rank() as f64).abs();
    1.0 - diff / 2.0
}

// =============================================================================
// Sentiment
// =============================================================================

/// Sentiment from emotion polarity plus keyword hits in the text.
pub fn detect_sentiment(scores: &BTreeMap<Emotion, f64>, text: &str) -> Polarity {
    if text.trim().is_empty() {
        return Polarity::Neutral;
    }
    let folded = fold_key(text);
    let hits = |words: &[&str]| words.iter().filter(|w| folded.contains(*w)).count() as f64;

    let (positive, negative, _) = polarity_sums(scores);
    let positive = positive + hits(POSITIVE_KEYWORDS) * KEYWORD_WEIGHT;
    let negative = negative + hits(NEGATIVE_KEYWORDS) * KEYWORD_WEIGHT;

    if positive > negative * SENTIMENT_MARGIN {
        Polarity::Positive
    } else if negative > positive * SENTIMENT_MARGIN {
        Polarity::Negative
    } else {
        Polarity::Neutral
    }
}

fn sentiment_category(sentiment: Polarity) -> NpsCategory {
    match sentiment {
        Polarity::Positive => NpsCategory::Promoter,
        Polarity::Negative => NpsCategory::Detractor,
        Polarity::Neutral => NpsCategory::Passive,
    }
}

// =============================================================================
// Inference
// =============================================================================

fn inference_weight(emotion: Emotion) -> f64 {
    match emotion {
        Emotion::Entusiasmo => 2.8,
        Emotion::Gratitud => 2.5,
        Emotion::Alegria => 2.2,
        Emotion::Esperanza => 2.0,
        Emotion::Aprecio => 1.8,
        Emotion::Confianza => 1.6,
        Emotion::Expectativa => 1.3,
        Emotion::Enojo => -3.0,
        Emotion::Frustracion => -2.7,
        Emotion::Decepcion => -2.4,
        Emotion::Desagrado => -2.1,
        Emotion::Verguenza => -1.8,
        Emotion::Tristeza => -1.5,
        Emotion::Miedo => -1.2,
        Emotion::Sorpresa => 0.2,
        Emotion::Indiferencia => -0.3,
    }
}

/// Estimate a 0-10 score from weighted emotions, sentiment and churn.
///
/// Returns `(score, confidence)`. A comment with no emotion signal is
/// scored 5.0 with confidence 0.1.
pub fn infer_score(
    scores: &BTreeMap<Emotion, f64>,
    sentiment: Polarity,
    churn_hint: Option<f64>,
) -> (f64, f64) {
    if scores.values().all(|s| *s <= 0.0) {
        return (5.0, 0.1);
    }

    let (weighted, total_weight) = scores.iter().fold((0.0, 0.0), |(sum, total), (e, s)| {
        let w = inference_weight(*e);
        (sum + w * s, total + w.abs())
    });
    let emotion_score = if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    };

    let sentiment_factor = match sentiment {
        Polarity::Positive => 0.4,
        Polarity::Negative => -0.4,
        Polarity::Neutral => 0.0,
    };
    let churn = churn_hint.unwrap_or(0.5);
    let churn_penalty = -(churn - 0.5) * 0.6;

    let combined = emotion_score + sentiment_factor + churn_penalty;
    let score = (5.0 + combined * 3.33).clamp(0.0, 10.0);
    let score = (score * 10.0).round() / 10.0;

    (score, inference_confidence(scores, sentiment, churn))
}

fn inference_confidence(scores: &BTreeMap<Emotion, f64>, sentiment: Polarity, churn: f64) -> f64 {
    let n = scores.len().max(1) as f64;
    let mean = scores.values().sum::<f64>() / n;
    let variance = scores.values().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let max = scores.values().copied().fold(0.0_f64, f64::max);

    let clarity = max - variance.sqrt();
    let sentiment_boost = if sentiment == Polarity::Neutral {
        0.0
    } else {
        0.2
    };
    let churn_clarity = (churn - 0.5).abs() * 0.4;

    (clarity * 0.6 + sentiment_boost + churn_clarity).clamp(0.1, 0.95)
}

// =============================================================================
// Reconciliation
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NpsOutcome {
    pub assessment: NpsAssessment,
    pub corrections: Vec<Correction>,
}

fn correction(from: impl Into<String>, to: NpsCategory, reason: impl Into<String>) -> Correction {
    Correction {
        field: "nps_category".to_string(),
        from: from.into(),
        to: to.to_string(),
        reason: reason.into(),
    }
}

/// Reconcile the reported category against the input score or sentiment.
pub fn reconcile_nps(
    reported_label: Option<&str>,
    input_score: Option<f64>,
    scores: &BTreeMap<Emotion, f64>,
    text: &str,
    churn_hint: Option<f64>,
) -> NpsOutcome {
    let reported = reported_label.and_then(NpsCategory::from_label);
    if reported.is_none() {
        if let Some(label) = reported_label {
            tracing::debug!(label = %label, "Unrecognized NPS category");
        }
    }

    match input_score.and_then(normalize_score) {
        Some(score) => reconcile_with_score(reported, score, input_score),
        None => reconcile_with_sentiment(reported, scores, text, churn_hint),
    }
}

fn reconcile_with_score(
    reported: Option<NpsCategory>,
    score: f64,
    raw_score: Option<f64>,
) -> NpsOutcome {
    let standard = NpsCategory::from_score(score);
    let mut corrections = Vec::new();

    if let Some(raw) = raw_score {
        if raw != score {
            corrections.push(Correction {
                field: "nps_score".to_string(),
                from: raw.to_string(),
                to: score.to_string(),
                reason: "score normalized to 0-10".to_string(),
            });
        }
    }

    let category = match reported {
        Some(category) if admitted_categories(score).contains(&category) => category,
        Some(category) => {
            corrections.push(correction(
                category.to_string(),
                standard,
                format!("score {} does not admit {}", score, category),
            ));
            standard
        }
        None => {
            corrections.push(correction("unknown", standard, "category from score"));
            standard
        }
    };

    let consistency = rank_consistency(reported.unwrap_or(standard), standard);
    NpsOutcome {
        assessment: NpsAssessment {
            category,
            score: Some(score),
            inferred_score: None,
            inference_confidence: None,
            consistency_score: consistency,
            alignment: SentimentAlignment::from_consistency(consistency),
        },
        corrections,
    }
}

fn reconcile_with_sentiment(
    reported: Option<NpsCategory>,
    scores: &BTreeMap<Emotion, f64>,
    text: &str,
    churn_hint: Option<f64>,
) -> NpsOutcome {
    let sentiment = detect_sentiment(scores, text);
    let expected = sentiment_category(sentiment);
    let mut corrections = Vec::new();

    let category = match (reported, sentiment) {
        (Some(NpsCategory::Promoter), Polarity::Negative) => {
            corrections.push(correction(
                NpsCategory::Promoter.to_string(),
                NpsCategory::Detractor,
                "negative sentiment",
            ));
            NpsCategory::Detractor
        }
        (Some(NpsCategory::Detractor), Polarity::Positive) => {
            corrections.push(correction(
                NpsCategory::Detractor.to_string(),
                NpsCategory::Promoter,
                "positive sentiment",
            ));
            NpsCategory::Promoter
        }
        (Some(category), _) => category,
        (None, _) => {
            corrections.push(correction("unknown", expected, "category from sentiment"));
            expected
        }
    };

    let compared = reported.unwrap_or(category);
    let consistency = if compared == expected {
        1.0
    } else if compared == NpsCategory::Passive || expected == NpsCategory::Passive {
        0.5
    } else {
        0.0
    };

    let (inferred, confidence) = infer_score(scores, sentiment, churn_hint);
    NpsOutcome {
        assessment: NpsAssessment {
            category,
            score: None,
            inferred_score: Some(inferred),
            inference_confidence: Some(confidence),
            consistency_score: consistency,
            alignment: SentimentAlignment::from_consistency(consistency),
        },
        corrections,
    }
}

// =============================================================================
// Dataset Aggregates
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpsInsights {
    pub total: usize,
    pub promoters: usize,
    pub passives: usize,
    pub detractors: usize,
    /// %promoters - %detractors, in [-100, 100]
    pub nps_score: f64,
    pub promoter_pct: f64,
    pub passive_pct: f64,
    pub detractor_pct: f64,
    pub average_consistency: f64,
    /// Records whose category was corrected
    pub corrected: usize,
    pub correction_rate: f64,
    /// Records scored by inference because no score was supplied
    pub inferred: usize,
}

/// Aggregate over `(assessment, category_corrected)` pairs.
pub fn aggregate<'a>(records: impl IntoIterator<Item = (&'a NpsAssessment, bool)>) -> NpsInsights {
    let mut insights = NpsInsights::default();
    let mut consistency = 0.0;

    for (assessment, corrected) in records {
        insights.total += 1;
        match assessment.category {
            NpsCategory::Promoter => insights.promoters += 1,
            NpsCategory::Passive => insights.passives += 1,
            NpsCategory::Detractor => insights.detractors += 1,
        }
        consistency += assessment.consistency_score;
        insights.corrected += usize::from(corrected);
        insights.inferred += usize::from(assessment.inferred_score.is_some());
    }

    if insights.total == 0 {
        return insights;
    }

    let pct = |count: usize| count as f64 / insights.total as f64 * 100.0;
    insights.promoter_pct = pct(insights.promoters);
    insights.passive_pct = pct(insights.passives);
    insights.detractor_pct = pct(insights.detractors);
    insights.nps_score = insights.promoter_pct - insights.detractor_pct;
    insights.average_consistency = consistency / insights.total as f64;
    insights.correction_rate = insights.corrected as f64 / insights.total as f64;
    insights
}
