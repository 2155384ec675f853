//! Batch analysis prompts.
//!
//! The system message describes the 16 emotions, pain points, churn risk and
//! NPS category in the requested language; the user message numbers the
//! comments and pins the JSON response shape.

use serde_json::{Map, Value, json};

use crate::types::{Emotion, Polarity};

/// System and user message pair for a chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPrompt {
    pub system: String,
    pub user: String,
}

struct Template {
    role: &'static str,
    emotions_header: &'static str,
    positive: &'static str,
    negative: &'static str,
    neutral: &'static str,
    pain_points: &'static str,
    churn: &'static str,
    nps: &'static str,
    closing: &'static str,
    request: &'static str,
    format_header: &'static str,
    rules: &'static [&'static str],
}

const SPANISH: Template = Template {
    role: "Eres un experto analista de sentimientos y experiencia del cliente. \
           Analiza comentarios en español, guaraní o inglés y proporciona:",
    emotions_header: "EMOCIONES (16 categorías, valores 0-1):",
    positive: "Positivas",
    negative: "Negativas",
    neutral: "Neutras",
    pain_points: "PAIN POINTS: Extrae hasta 5 problemas específicos mencionados, categorizados por área.",
    churn: "CHURN RISK: Probabilidad 0-1 de que el cliente abandone el servicio.",
    nps: "NPS CATEGORY: Clasifica como \"Promotor\", \"Pasivo\" o \"Detractor\".",
    closing: "Responde únicamente en JSON válido.",
    request: "Analiza los siguientes {count} comentarios y devuelve un array JSON con el análisis de cada uno:",
    format_header: "FORMATO DE RESPUESTA REQUERIDO:",
    rules: &[
        "Devuelve exactamente {count} objetos JSON en el array",
        "Mantén el orden de los comentarios",
        "Valores de emociones entre 0 y 1 (la suma no necesita ser 1)",
        "Pain points máximo 5 por comentario",
        "Churn risk entre 0 y 1",
        "Solo JSON válido, sin explicaciones adicionales",
    ],
};

const ENGLISH: Template = Template {
    role: "You are an expert sentiment analyst and customer experience specialist. \
           Analyze comments in Spanish, Guarani, or English and provide:",
    emotions_header: "EMOTIONS (16 categories, values 0-1):",
    positive: "Positive",
    negative: "Negative",
    neutral: "Neutral",
    pain_points: "PAIN POINTS: Extract up to 5 specific problems mentioned, categorized by area.",
    churn: "CHURN RISK: Probability 0-1 that the customer will abandon the service.",
    nps: "NPS CATEGORY: Classify as \"Promotor\", \"Pasivo\" or \"Detractor\".",
    closing: "Respond only in valid JSON.",
    request: "Analyze the following {count} comments and return a JSON array with one analysis per comment:",
    format_header: "REQUIRED RESPONSE FORMAT:",
    rules: &[
        "Return exactly {count} JSON objects in the array",
        "Keep the order of the comments",
        "Emotion values between 0 and 1 (they need not sum to 1)",
        "At most 5 pain points per comment",
        "Churn risk between 0 and 1",
        "Valid JSON only, no additional explanation",
    ],
};

const GUARANI: Template = Template {
    role: "Nde analista tembiapokatúva ñe'ẽme ha costumer experiencia-pe. \
           Emongu'e comentario español, guaraní térã inglés-pe ha eme'ẽ:",
    emotions_header: "EMOCIONES (16 categoría, valores 0-1):",
    positive: "Positivas",
    negative: "Negativas",
    neutral: "Neutras",
    pain_points: "PAIN POINTS: Gueraha 5 peve problema específico oñe'ẽva, categorizada área rupive.",
    churn: "CHURN RISK: Probabilidad 0-1 kostumer oheja hag̃ua servicio.",
    nps: "NPS CATEGORY: Clasificar \"Promotor\", \"Pasivo\" térã \"Detractor\".",
    closing: "Ñembohovái añónte JSON oikóva.",
    request: "Emongu'e ko'ã {count} comentario ha eme'ẽ peteĩ array JSON:",
    format_header: "FORMATO RESPUESTA:",
    rules: &[
        "Eme'ẽ {count} objeto JSON array-pe",
        "Ejapo comentario orden-pe",
        "Emoción valor 0 ha 1 mbytépe",
        "Pain points 5 peve comentario rehe",
        "Churn risk 0 ha 1 mbytépe",
        "JSON añónte",
    ],
};

fn template(language: &str) -> &'static Template {
    match language {
        "en" => &ENGLISH,
        "gn" => &GUARANI,
        _ => &SPANISH,
    }
}

fn emotion_list(polarity: Polarity) -> String {
    Emotion::ALL
        .iter()
        .filter(|e| e.polarity() == polarity)
        .map(Emotion::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn response_example() -> Value {
    let emotions: Map<String, Value> = Emotion::ALL
        .iter()
        .map(|e| (e.as_str().to_string(), json!(0.0)))
        .collect();
    json!({
        "comentario": "texto del comentario original",
        "emociones": emotions,
        "pain_points": [{
            "descripcion": "problema específico mencionado",
            "categoria": "servicio|producto|proceso|comunicacion|precio|tiempo|calidad|personal",
            "severidad": "alta|media|baja"
        }],
        "churn_risk": 0.0,
        "nps_category": "Promotor|Pasivo|Detractor",
        "reasoning": "breve explicación del análisis"
    })
}

/// Build the prompt for one batch. Unknown languages fall back to Spanish.
pub fn build_analysis_prompt(texts: &[String], language: &str) -> AnalysisPrompt {
    let t = template(language);
    let count = texts.len().to_string();

    let system = format!(
        "{role}\n\n1. {emotions}\n   - {pos}: {pos_list}\n   - {neg}: {neg_list}\n   - {neu}: {neu_list}\n\n2. {pain}\n\n3. {churn}\n\n4. {nps}\n\n{closing}",
        role = t.role,
        emotions = t.emotions_header,
        pos = t.positive,
        pos_list = emotion_list(Polarity::Positive),
        neg = t.negative,
        neg_list = emotion_list(Polarity::Negative),
        neu = t.neutral,
        neu_list = emotion_list(Polarity::Neutral),
        pain = t.pain_points,
        churn = t.churn,
        nps = t.nps,
        closing = t.closing,
    );

    let mut user = t.request.replace("{count}", &count);
    user.push_str("\n\n");
    for (i, text) in texts.iter().enumerate() {
        user.push_str(&format!("{}. {}\n", i + 1, text));
    }

    let example = serde_json::to_string_pretty(&json!([response_example()]))
        .unwrap_or_else(|_| "[]".to_string());
    user.push_str(&format!("\n{}\n```json\n{}\n```\n\n", t.format_header, example));
    for rule in t.rules {
        user.push_str(&format!("- {}\n", rule.replace("{count}", &count)));
    }

    AnalysisPrompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Vec<String> {
        vec!["Muy buena atención".to_string(), "Demora excesiva".to_string()]
    }

    #[test]
    fn test_prompt_numbers_comments_and_pins_count() {
        let prompt = build_analysis_prompt(&texts(), "es");
        assert!(prompt.user.contains("1. Muy buena atención"));
        assert!(prompt.user.contains("2. Demora excesiva"));
        assert!(prompt.user.contains("exactamente 2 objetos"));
        assert!(prompt.user.contains("\"verguenza\": 0.0"));
        assert!(prompt.system.contains("sorpresa, indiferencia"));
    }

    #[test]
    fn test_languages() {
        assert!(build_analysis_prompt(&texts(), "en").system.starts_with("You are"));
        assert!(build_analysis_prompt(&texts(), "gn").system.starts_with("Nde analista"));
        assert_eq!(
            build_analysis_prompt(&texts(), "fr"),
            build_analysis_prompt(&texts(), "es")
        );
    }
}
