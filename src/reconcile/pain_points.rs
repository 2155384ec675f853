//! Pain point reconciliation.
//!
//! Cleans collaborator pain points, detects additional ones in the comment
//! text with keyword patterns, merges duplicates and ranks the result by
//! impact (severity weight x category weight).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::PainPointConfig;
use crate::constants::reconcile::{CONTEXT_WINDOW_CHARS, HIGH_IMPACT};
use crate::types::{
    PainCategory, PainOrigin, PainPoint, ParseWithDefault, RawPainPoint, Severity, fold_key,
    normalize_whitespace,
};

type PatternGroup = (&'static str, &'static [&'static str]);

/// Keyword patterns per category, accent-free and lowercase.
const PATTERNS: &[(PainCategory, &[PatternGroup])] = &[
    (
        PainCategory::Servicio,
        &[
            ("lentitud", &["lento", "demora", "tardanza", "espere", "waiting"]),
            ("mal servicio", &["mal servicio", "pesimo servicio", "servicio horrible"]),
            ("indisponibilidad", &["no funciona", "caido", "sin servicio", "indisponible"]),
            ("complejidad", &["complicado", "dificil", "confuso", "no entiendo"]),
        ],
    ),
    (
        PainCategory::Producto,
        &[
            ("defectos", &["defectuoso", "roto", "no funciona bien", "falla"]),
            ("limitaciones", &["limitado", "no tiene", "falta", "no permite"]),
            ("obsolescencia", &["obsoleto", "viejo", "desactualizado", "anticuado"]),
            ("errores", &["error", "bug", "no responde"]),
        ],
    ),
    (
        PainCategory::Precio,
        &[
            ("precio alto", &["caro", "costoso", "precio alto"]),
            ("valor", &["no vale la pena", "sobreprecio", "no justifica"]),
            ("aumentos", &["aumento", "subio el precio", "mas caro que antes"]),
            ("cargos ocultos", &["cargo extra", "cobro adicional", "fee oculto"]),
        ],
    ),
    (
        PainCategory::Proceso,
        &[
            ("burocracia", &["proceso complicado", "muchos pasos", "burocratico"]),
            ("proceso lento", &["proceso lento", "demora mucho", "tarda"]),
            ("requisitos", &["pide muchos datos", "muchos requisitos"]),
        ],
    ),
    (
        PainCategory::Comunicacion,
        &[
            ("sin respuesta", &["no responden", "no contestan", "sin respuesta"]),
            ("mala informacion", &["mala informacion", "info incorrecta", "mal informado"]),
            ("malentendidos", &["no me entienden", "no comprenden", "malentendido"]),
            ("trato", &["prepotente", "grosero"]),
        ],
    ),
    (
        PainCategory::Tiempo,
        &[
            ("demora", &["demora", "tardanza", "mucho tiempo"]),
            ("horarios", &["horario malo", "cierran temprano", "no atienden"]),
            ("espera", &["mucha espera", "cola larga", "espere mucho"]),
        ],
    ),
    (
        PainCategory::Calidad,
        &[
            ("baja calidad", &["mala calidad", "baja calidad", "calidad pobre"]),
            ("inconsistencia", &["inconsistente", "a veces bien"]),
            ("deterioro", &["empeoro", "ya no es como antes", "perdio calidad"]),
        ],
    ),
    (
        PainCategory::Personal,
        &[
            ("capacitacion", &["no sabe", "no conoce", "sin capacitacion"]),
            ("actitud", &["mala actitud", "antipatico"]),
            ("falta de personal", &["poco personal", "falta gente", "solo uno atendiendo"]),
        ],
    ),
];

/// Fallback words used when a description matches no pattern
const CATEGORY_WORDS: &[(PainCategory, &[&str])] = &[
    (PainCategory::Precio, &["precio", "caro", "costoso", "cobro"]),
    (PainCategory::Producto, &["producto", "funciona", "feature", "caracteristica"]),
    (PainCategory::Proceso, &["proceso", "tramite", "procedimiento"]),
    (PainCategory::Comunicacion, &["comunicacion", "respuesta", "informacion"]),
    (PainCategory::Tiempo, &["tiempo", "demora", "espera"]),
    (PainCategory::Calidad, &["calidad", "mal hecho"]),
    (PainCategory::Personal, &["personal", "empleado", "atencion"]),
];

const HIGH_SEVERITY_WORDS: &[&str] = &[
    "inaceptable",
    "horrible",
    "pesimo",
    "terrible",
    "desastroso",
    "cancelar",
    "nunca mas",
    "estafa",
    "fraude",
    "engano",
];

const MEDIUM_SEVERITY_WORDS: &[&str] = &[
    "malo",
    "problema",
    "molesto",
    "incomodo",
    "decepcionante",
    "frustrante",
    "preocupante",
];

// =============================================================================
// Classification
// =============================================================================

/// Severity implied by the words around a pain point.
///
/// Empty context defaults to `media`, anything else without severity words to `baja`.
pub fn severity_from_context(context: &str) -> Severity {
    if context.trim().is_empty() {
        return Severity::Media;
    }
    let folded = fold_key(context);
    if HIGH_SEVERITY_WORDS.iter().any(|w| folded.contains(w)) {
        Severity::Alta
    } else if MEDIUM_SEVERITY_WORDS.iter().any(|w| folded.contains(w)) {
        Severity::Media
    } else {
        Severity::Baja
    }
}

/// Infer a category from a description.
pub fn categorize_by_content(description: &str) -> PainCategory {
    let folded = fold_key(description);
    for (category, groups) in PATTERNS {
        if groups
            .iter()
            .any(|(_, words)| words.iter().any(|w| folded.contains(w)))
        {
            return *category;
        }
    }
    CATEGORY_WORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| folded.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(PainCategory::Servicio)
}

fn impact(severity: Severity, category: PainCategory) -> f64 {
    severity.weight() * category.weight()
}

// =============================================================================
// Cleaning and Detection
// =============================================================================

/// Validate collaborator pain points; entries without a description are dropped.
pub fn clean_pain_points(raw: &[RawPainPoint]) -> Vec<PainPoint> {
    raw.iter()
        .filter_map(|point| {
            let description = normalize_whitespace(&point.description);
            if description.is_empty() {
                return None;
            }
            let category = match point.category.as_deref().map(str::trim) {
                Some(label) if !label.is_empty() => PainCategory::parse_or_default(label),
                _ => categorize_by_content(&description),
            };
            let severity = point
                .severity
                .as_deref()
                .and_then(Severity::try_parse)
                .unwrap_or_else(|| severity_from_context(&description));
            Some(PainPoint {
                impact: impact(severity, category),
                description,
                category,
                severity,
                origin: PainOrigin::Collaborator,
            })
        })
        .collect()
}

/// Text around the first occurrence of `keyword` (already folded).
fn context_around(text: &str, keyword: &str) -> String {
    let trimmed = text.trim();
    let folded = fold_key(trimmed);
    let Some(byte_idx) = folded.find(keyword) else {
        return String::new();
    };

    // Folding is char-for-char except for rare multi-char lowercase mappings.
    let source: Vec<char> = if trimmed.chars().count() == folded.chars().count() {
        trimmed.chars().collect()
    } else {
        folded.chars().collect()
    };
    let start_char = folded[..byte_idx].chars().count();
    let end_char = start_char + keyword.chars().count();

    let from = start_char.saturating_sub(CONTEXT_WINDOW_CHARS);
    let to = (end_char + CONTEXT_WINDOW_CHARS).min(source.len());
    normalize_whitespace(&source[from..to].iter().collect::<String>())
}

/// Pain points found by keyword patterns; at most one per pattern group.
pub fn detect_in_text(text: &str) -> Vec<PainPoint> {
    let folded = fold_key(text);
    if folded.is_empty() {
        return Vec::new();
    }

    let mut detected = Vec::new();
    for (category, groups) in PATTERNS {
        for (label, words) in *groups {
            let Some(keyword) = words.iter().find(|w| folded.contains(*w)) else {
                continue;
            };
            let context = context_around(text, keyword);
            let severity = severity_from_context(&context);
            let description = if context.is_empty() {
                format!("Problema relacionado con {}", label)
            } else {
                context
            };
            detected.push(PainPoint {
                description,
                category: *category,
                severity,
                impact: impact(severity, *category),
                origin: PainOrigin::Text,
            });
        }
    }
    detected
}

// =============================================================================
// Merge and Rank
// =============================================================================

/// Jaccard similarity over whitespace-separated words.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    let words_a: BTreeSet<&str> = a.split_whitespace().collect();
    let words_b: BTreeSet<&str> = b.split_whitespace().collect();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / union as f64
}

fn description_key(description: &str) -> String {
    normalize_whitespace(&description.to_lowercase())
}

/// Merge collaborator and text pain points, collaborator entries first.
///
/// A point is dropped when its normalized description was already seen or
/// its word similarity to a kept point exceeds `threshold`.
pub fn merge_pain_points(
    collaborator: Vec<PainPoint>,
    detected: Vec<PainPoint>,
    threshold: f64,
) -> Vec<PainPoint> {
    let mut kept: Vec<(String, PainPoint)> = Vec::new();
    for point in collaborator.into_iter().chain(detected) {
        let key = description_key(&point.description);
        let duplicate = kept
            .iter()
            .any(|(existing, _)| *existing == key || word_similarity(existing, &key) > threshold);
        if !duplicate {
            kept.push((key, point));
        }
    }
    kept.into_iter().map(|(_, point)| point).collect()
}

/// Sort by impact, highest first; ties keep their merge order.
pub fn rank_pain_points(points: &mut [PainPoint]) {
    points.sort_by(|a, b| b.impact.total_cmp(&a.impact));
}

pub fn category_distribution(points: &[PainPoint]) -> BTreeMap<PainCategory, usize> {
    let mut distribution = BTreeMap::new();
    for point in points {
        *distribution.entry(point.category).or_insert(0) += 1;
    }
    distribution
}

#[derive(Debug, Clone, PartialEq)]
pub struct PainOutcome {
    pub points: Vec<PainPoint>,
    pub distribution: BTreeMap<PainCategory, usize>,
}

/// Clean, detect, merge, rank and cap the pain points of one comment.
pub fn reconcile_pain_points(
    raw: &[RawPainPoint],
    text: &str,
    config: &PainPointConfig,
) -> PainOutcome {
    let mut points = merge_pain_points(
        clean_pain_points(raw),
        detect_in_text(text),
        config.similarity_threshold,
    );
    rank_pain_points(&mut points);
    points.truncate(config.max_pain_points);

    let distribution = category_distribution(&points);
    PainOutcome {
        points,
        distribution,
    }
}

// =============================================================================
// Dataset Aggregates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPainPoint {
    pub description: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PainInsights {
    pub total: usize,
    pub average_per_comment: f64,
    pub average_impact: f64,
    pub high_impact: usize,
    pub category_distribution: BTreeMap<PainCategory, usize>,
    pub severity_distribution: BTreeMap<Severity, usize>,
    pub most_problematic: Option<PainCategory>,
    /// Most frequent descriptions (up to 10)
    pub top: Vec<TopPainPoint>,
}

const TOP_DESCRIPTIONS: usize = 10;

/// Aggregate over the pain point lists of analyzed comments.
pub fn aggregate<'a>(records: impl IntoIterator<Item = &'a [PainPoint]>) -> PainInsights {
    let mut insights = PainInsights::default();
    let mut comments = 0usize;
    let mut impact_sum = 0.0;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for points in records {
        comments += 1;
        for point in points {
            insights.total += 1;
            impact_sum += point.impact;
            if point.impact > HIGH_IMPACT {
                insights.high_impact += 1;
            }
            *insights
                .category_distribution
                .entry(point.category)
                .or_insert(0) += 1;
            *insights
                .severity_distribution
                .entry(point.severity)
                .or_insert(0) += 1;
            let count = counts.entry(point.description.as_str()).or_insert(0);
            if *count == 0 {
                first_seen.push(point.description.as_str());
            }
            *count += 1;
        }
    }

    if insights.total == 0 {
        return insights;
    }

    insights.average_per_comment = insights.total as f64 / comments as f64;
    insights.average_impact = impact_sum / insights.total as f64;
    insights.most_problematic = insights
        .category_distribution
        .iter()
        .fold(None, |best: Option<(PainCategory, usize)>, (category, count)| {
            match best {
                Some((_, top)) if *count <= top => best,
                _ => Some((*category, *count)),
            }
        })
        .map(|(category, _)| category);

    let mut ranked: Vec<(&str, usize)> = first_seen
        .into_iter()
        .map(|desc| (desc, counts.get(desc).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    insights.top = ranked
        .into_iter()
        .take(TOP_DESCRIPTIONS)
        .map(|(description, count)| TopPainPoint {
            description: description.to_string(),
            count,
            percentage: count as f64 / insights.total as f64 * 100.0,
        })
        .collect();
    insights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(description: &str, category: Option<&str>, severity: Option<&str>) -> RawPainPoint {
        RawPainPoint {
            description: description.to_string(),
            category: category.map(str::to_string),
            severity: severity.map(str::to_string),
        }
    }

    #[test]
    fn test_clean_drops_empty_and_normalizes() {
        let cleaned = clean_pain_points(&[
            raw("   ", Some("precio"), None),
            raw("Precio  muy alto", Some("Pricing"), Some("ALTA")),
            raw("Nadie contesta, sin respuesta", None, None),
        ]);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].description, "Precio muy alto");
        assert_eq!(cleaned[0].category, PainCategory::Precio);
        assert_eq!(cleaned[0].severity, Severity::Alta);
        assert!((cleaned[0].impact - 0.8 * 0.7).abs() < 1e-9);
        assert_eq!(cleaned[1].category, PainCategory::Comunicacion);
        assert_eq!(cleaned[1].severity, Severity::Baja);
    }

    #[test]
    fn test_severity_from_context() {
        assert_eq!(severity_from_context("Es un fraude total"), Severity::Alta);
        assert_eq!(severity_from_context("Servicio pésimo"), Severity::Alta);
        assert_eq!(severity_from_context("un problema menor"), Severity::Media);
        assert_eq!(severity_from_context("algo lento"), Severity::Baja);
        assert_eq!(severity_from_context(""), Severity::Media);
    }

    #[test]
    fn test_detect_in_text_captures_context() {
        let text = "La atención fue lento y además es muy caro, horrible experiencia";
        let detected = detect_in_text(text);

        assert!(detected.iter().any(|p| p.category == PainCategory::Servicio));
        let price = detected
            .iter()
            .find(|p| p.category == PainCategory::Precio)
            .unwrap();
        assert!(price.description.contains("caro"));
        assert_eq!(price.severity, Severity::Alta);
        assert!(detected.iter().all(|p| p.origin == PainOrigin::Text));
    }

    #[test]
    fn test_detect_in_empty_text() {
        assert!(detect_in_text("  ").is_empty());
    }

    #[test]
    fn test_merge_dedupes_by_description_and_similarity() {
        let collaborator = clean_pain_points(&[
            raw("Demora en la entrega", Some("tiempo"), None),
            raw("demora  en la ENTREGA", Some("tiempo"), None),
        ]);
        let detected = vec![
            PainPoint {
                description: "demora en la entrega final".to_string(),
                category: PainCategory::Tiempo,
                severity: Severity::Media,
                impact: 0.3,
                origin: PainOrigin::Text,
            },
            PainPoint {
                description: "precio alto".to_string(),
                category: PainCategory::Precio,
                severity: Severity::Media,
                impact: 0.42,
                origin: PainOrigin::Text,
            },
        ];

        let merged = merge_pain_points(collaborator, detected, 0.7);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].origin, PainOrigin::Collaborator);
        assert_eq!(merged[1].description, "precio alto");
    }

    #[test]
    fn test_word_similarity() {
        assert_eq!(word_similarity("a b", "a b"), 1.0);
        assert_eq!(word_similarity("", "a"), 0.0);
        assert!((word_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_ranks_and_caps() {
        let raw_points: Vec<RawPainPoint> = [
            ("uno", "tiempo", "baja"),
            ("dos", "servicio", "critica"),
            ("tres", "precio", "media"),
            ("cuatro", "calidad", "alta"),
            ("cinco", "personal", "baja"),
            ("seis", "producto", "media"),
        ]
        .iter()
        .map(|(d, c, s)| raw(d, Some(c), Some(s)))
        .collect();

        let outcome = reconcile_pain_points(&raw_points, "", &PainPointConfig::default());
        assert_eq!(outcome.points.len(), 5);
        assert_eq!(outcome.points[0].description, "dos");
        assert!(
            outcome
                .points
                .windows(2)
                .all(|w| w[0].impact >= w[1].impact)
        );
        assert_eq!(outcome.distribution.values().sum::<usize>(), 5);
        assert!(!outcome.points.iter().any(|p| p.description == "uno"));
    }

    #[test]
    fn test_aggregate_pain_points() {
        let a = clean_pain_points(&[raw("Precio alto", Some("precio"), Some("alta"))]);
        let b = clean_pain_points(&[
            raw("Precio alto", Some("precio"), Some("media")),
            raw("Servicio caído", Some("servicio"), Some("critica")),
        ]);
        let c: Vec<PainPoint> = Vec::new();

        let insights = aggregate([a.as_slice(), b.as_slice(), c.as_slice()]);
        assert_eq!(insights.total, 3);
        assert!((insights.average_per_comment - 1.0).abs() < 1e-9);
        assert_eq!(insights.most_problematic, Some(PainCategory::Precio));
        assert_eq!(insights.top[0].description, "Precio alto");
        assert_eq!(insights.top[0].count, 2);
        assert_eq!(insights.high_impact, 1);
    }
}
