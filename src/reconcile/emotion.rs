//! Emotion reconciliation.
//!
//! Resolves collaborator keys to the 16-emotion taxonomy, clamps scores and
//! derives the emotional profile (dominant emotion, intensity, polarity,
//! balance and patterns).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::reconcile::{ACTIVE_EMOTION, STRONG_EMOTION};
use crate::types::{
    Correction, Emotion, EmotionPatterns, EmotionProfile, Polarity, unit_clamp, value_as_f64,
};

/// Sum of arousal emotions above which a comment counts as high arousal
const HIGH_AROUSAL_SUM: f64 = 1.5;

/// Max positive and max negative above which emotions are in conflict
const CONFLICT_THRESHOLD: f64 = 0.5;

const AROUSAL: [Emotion; 4] = [
    Emotion::Enojo,
    Emotion::Miedo,
    Emotion::Entusiasmo,
    Emotion::Sorpresa,
];

/// Reconciled emotion scores with their derived profile.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionOutcome {
    pub scores: BTreeMap<Emotion, f64>,
    pub profile: EmotionProfile,
    pub corrections: Vec<Correction>,
}

/// Validate raw emotion scores.
///
/// Unknown keys are dropped, missing emotions are filled with 0 and values
/// outside [0, 1] are clamped with a correction. When two aliases resolve to
/// the same emotion the higher score wins.
pub fn reconcile_emotions(raw: &BTreeMap<String, serde_json::Value>) -> EmotionOutcome {
    let mut scores: BTreeMap<Emotion, f64> = Emotion::ALL.iter().map(|e| (*e, 0.0)).collect();
    let mut corrections = Vec::new();

    for (key, value) in raw {
        let Some(emotion) = Emotion::from_key(key) else {
            tracing::debug!(key = %key, "Ignoring unknown emotion key");
            continue;
        };

        let score = match value_as_f64(value) {
            Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => v,
            Some(v) => {
                let clamped = unit_clamp(v);
                corrections.push(Correction {
                    field: format!("emotions.{}", emotion),
                    from: v.to_string(),
                    to: clamped.to_string(),
                    reason: "score outside [0, 1]".to_string(),
                });
                clamped
            }
            None if value.is_null() => 0.0,
            None => {
                corrections.push(Correction {
                    field: format!("emotions.{}", emotion),
                    from: value.to_string(),
                    to: "0".to_string(),
                    reason: "non-numeric score".to_string(),
                });
                0.0
            }
        };

        if let Some(slot) = scores.get_mut(&emotion) {
            *slot = slot.max(score);
        }
    }

    let profile = profile(&scores);
    EmotionOutcome {
        scores,
        profile,
        corrections,
    }
}

/// Highest score, ties broken by taxonomy order; `None` when all are zero.
pub fn dominant_emotion(scores: &BTreeMap<Emotion, f64>) -> Option<Emotion> {
    let mut best: Option<(Emotion, f64)> = None;
    for emotion in Emotion::ALL {
        let score = scores.get(&emotion).copied().unwrap_or(0.0);
        if score <= 0.0 {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((emotion, score)),
        }
    }
    best.map(|(emotion, _)| emotion)
}

/// Mean of the three highest scores.
pub fn intensity(scores: &BTreeMap<Emotion, f64>) -> f64 {
    let mut values: Vec<f64> = scores.values().copied().collect();
    values.sort_by(|a, b| b.total_cmp(a));
    let top: Vec<f64> = values.into_iter().take(3).collect();
    if top.is_empty() {
        0.0
    } else {
        top.iter().sum::<f64>() / top.len() as f64
    }
}

/// Summed scores per polarity: (positive, negative, neutral).
pub fn polarity_sums(scores: &BTreeMap<Emotion, f64>) -> (f64, f64, f64) {
    scores
        .iter()
        .fold((0.0, 0.0, 0.0), |(pos, neg, neu), (emotion, score)| {
            match emotion.polarity() {
                Polarity::Positive => (pos + score, neg, neu),
                Polarity::Negative => (pos, neg + score, neu),
                Polarity::Neutral => (pos, neg, neu + score),
            }
        })
}

pub fn profile(scores: &BTreeMap<Emotion, f64>) -> EmotionProfile {
    let (positive, negative, neutral) = polarity_sums(scores);

    let category = if positive > negative && positive > neutral {
        Polarity::Positive
    } else if negative > positive && negative > neutral {
        Polarity::Negative
    } else {
        Polarity::Neutral
    };

    let balance = if positive + negative > 0.0 {
        (positive - negative) / (positive + negative)
    } else {
        0.0
    };

    EmotionProfile {
        dominant: dominant_emotion(scores),
        intensity: intensity(scores),
        category,
        balance,
        patterns: patterns(scores),
    }
}

fn patterns(scores: &BTreeMap<Emotion, f64>) -> EmotionPatterns {
    let score = |e: &Emotion| scores.get(e).copied().unwrap_or(0.0);

    let strong = scores.values().filter(|s| **s > STRONG_EMOTION).count();
    let active = scores.values().filter(|s| **s > ACTIVE_EMOTION).count();

    let max_of = |polarity: Polarity| {
        Emotion::ALL
            .iter()
            .filter(|e| e.polarity() == polarity)
            .map(score)
            .fold(0.0_f64, f64::max)
    };

    EmotionPatterns {
        mixed_emotions: strong > 2,
        emotional_conflict: max_of(Polarity::Positive) > CONFLICT_THRESHOLD
            && max_of(Polarity::Negative) > CONFLICT_THRESHOLD,
        high_arousal: AROUSAL.iter().map(score).sum::<f64>() > HIGH_AROUSAL_SUM,
        complexity: active as f64 / Emotion::ALL.len() as f64,
    }
}

// =============================================================================
// Dataset Aggregates
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternCounts {
    pub mixed_emotions: usize,
    pub emotional_conflict: usize,
    pub high_arousal: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionInsights {
    pub analyzed: usize,
    pub averages: BTreeMap<Emotion, f64>,
    /// Emotion with the highest average score
    pub dominant: Option<Emotion>,
    pub dominant_distribution: BTreeMap<Emotion, usize>,
    pub category_distribution: BTreeMap<String, usize>,
    pub patterns: PatternCounts,
    pub average_intensity: f64,
    pub average_balance: f64,
}

/// Aggregate emotion insights over `(scores, profile)` pairs.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = (&'a BTreeMap<Emotion, f64>, &'a EmotionProfile)>,
) -> EmotionInsights {
    let mut insights = EmotionInsights::default();
    let mut sums: BTreeMap<Emotion, f64> = BTreeMap::new();
    let mut intensity = 0.0;
    let mut balance = 0.0;

    for (scores, profile) in records {
        insights.analyzed += 1;
        for (emotion, score) in scores {
            *sums.entry(*emotion).or_insert(0.0) += score;
        }
        if let Some(dominant) = profile.dominant {
            *insights.dominant_distribution.entry(dominant).or_insert(0) += 1;
        }
        let category = match profile.category {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
            Polarity::Neutral => "neutral",
        };
        *insights
            .category_distribution
            .entry(category.to_string())
            .or_insert(0) += 1;

        insights.patterns.mixed_emotions += usize::from(profile.patterns.mixed_emotions);
        insights.patterns.emotional_conflict += usize::from(profile.patterns.emotional_conflict);
        insights.patterns.high_arousal += usize::from(profile.patterns.high_arousal);
        intensity += profile.intensity;
        balance += profile.balance;
    }

    if insights.analyzed == 0 {
        return insights;
    }

    let n = insights.analyzed as f64;
    insights.averages = sums.into_iter().map(|(e, s)| (e, s / n)).collect();
    insights.dominant = dominant_emotion(&insights.averages);
    insights.average_intensity = intensity / n;
    insights.average_balance = balance / n;
    insights
}
