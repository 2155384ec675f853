//! Closed vocabularies used across analysis records.
//!
//! Serialized names follow the Spanish labels the analysis prompts use;
//! parsing accepts Spanish, English and accent-free spellings.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::utils::{ParseWithDefault, fold_key};

// =============================================================================
// Emotions
// =============================================================================

/// The 16 tracked emotions, in canonical order.
///
/// `Ord` follows declaration order; it breaks ties when picking a dominant emotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Alegria,
    Tristeza,
    Enojo,
    Miedo,
    Confianza,
    Desagrado,
    Sorpresa,
    Expectativa,
    Frustracion,
    Gratitud,
    Aprecio,
    Indiferencia,
    Decepcion,
    Entusiasmo,
    Verguenza,
    Esperanza,
}

impl Emotion {
    pub const ALL: [Emotion; 16] = [
        Self::Alegria,
        Self::Tristeza,
        Self::Enojo,
        Self::Miedo,
        Self::Confianza,
        Self::Desagrado,
        Self::Sorpresa,
        Self::Expectativa,
        Self::Frustracion,
        Self::Gratitud,
        Self::Aprecio,
        Self::Indiferencia,
        Self::Decepcion,
        Self::Entusiasmo,
        Self::Verguenza,
        Self::Esperanza,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alegria => "alegria",
            Self::Tristeza => "tristeza",
            Self::Enojo => "enojo",
            Self::Miedo => "miedo",
            Self::Confianza => "confianza",
            Self::Desagrado => "desagrado",
            Self::Sorpresa => "sorpresa",
            Self::Expectativa => "expectativa",
            Self::Frustracion => "frustracion",
            Self::Gratitud => "gratitud",
            Self::Aprecio => "aprecio",
            Self::Indiferencia => "indiferencia",
            Self::Decepcion => "decepcion",
            Self::Entusiasmo => "entusiasmo",
            Self::Verguenza => "verguenza",
            Self::Esperanza => "esperanza",
        }
    }

    /// Resolve a collaborator-supplied key (Spanish with or without accents, or English).
    pub fn from_key(key: &str) -> Option<Self> {
        let folded = fold_key(key);
        if let Some(found) = Self::ALL.iter().find(|e| e.as_str() == folded) {
            return Some(*found);
        }
        let emotion = match folded.as_str() {
            "joy" | "happiness" => Self::Alegria,
            "sadness" => Self::Tristeza,
            "anger" | "enfado" => Self::Enojo,
            "fear" => Self::Miedo,
            "trust" => Self::Confianza,
            "disgust" => Self::Desagrado,
            "surprise" => Self::Sorpresa,
            "anticipation" | "expectation" => Self::Expectativa,
            "frustration" => Self::Frustracion,
            "gratitude" => Self::Gratitud,
            "appreciation" => Self::Aprecio,
            "indifference" => Self::Indiferencia,
            "disappointment" => Self::Decepcion,
            "enthusiasm" | "excitement" => Self::Entusiasmo,
            "shame" | "embarrassment" => Self::Verguenza,
            "hope" => Self::Esperanza,
            _ => return None,
        };
        Some(emotion)
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Self::Alegria
            | Self::Confianza
            | Self::Expectativa
            | Self::Gratitud
            | Self::Aprecio
            | Self::Entusiasmo
            | Self::Esperanza => Polarity::Positive,
            Self::Tristeza
            | Self::Enojo
            | Self::Miedo
            | Self::Desagrado
            | Self::Frustracion
            | Self::Decepcion
            | Self::Verguenza => Polarity::Negative,
            Self::Sorpresa | Self::Indiferencia => Polarity::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

// =============================================================================
// NPS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NpsCategory {
    Detractor,
    Passive,
    Promoter,
}

impl NpsCategory {
    /// Standard mapping: 0-6 detractor, 7-8 passive, 9-10 promoter.
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Self::Promoter
        } else if score >= 7.0 {
            Self::Passive
        } else {
            Self::Detractor
        }
    }

    /// Ordinal position: detractor 0, passive 1, promoter 2
    pub fn rank(&self) -> u8 {
        match self {
            Self::Detractor => 0,
            Self::Passive => 1,
            Self::Promoter => 2,
        }
    }

    /// Normalize a collaborator label (English or Spanish synonyms).
    pub fn from_label(label: &str) -> Option<Self> {
        match fold_key(label).as_str() {
            "promoter" | "promoters" | "promotor" | "promotora" | "promotores" | "positivo"
            | "defensor" => Some(Self::Promoter),
            "passive" | "passives" | "pasivo" | "pasiva" | "pasivos" | "neutral" | "neutro" => {
                Some(Self::Passive)
            }
            "detractor" | "detractors" | "detractora" | "detractores" | "critico"
            | "negativo" => Some(Self::Detractor),
            _ => None,
        }
    }
}

impl fmt::Display for NpsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detractor => "Detractor",
            Self::Passive => "Passive",
            Self::Promoter => "Promoter",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Churn
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bands: low < 0.3, medium < 0.6, high < 0.8, critical otherwise.
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

// =============================================================================
// Pain Points
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PainCategory {
    Servicio,
    Producto,
    Precio,
    Proceso,
    Comunicacion,
    Tiempo,
    Calidad,
    Personal,
}

impl PainCategory {
    pub const ALL: [PainCategory; 8] = [
        Self::Servicio,
        Self::Producto,
        Self::Precio,
        Self::Proceso,
        Self::Comunicacion,
        Self::Tiempo,
        Self::Calidad,
        Self::Personal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Servicio => "servicio",
            Self::Producto => "producto",
            Self::Precio => "precio",
            Self::Proceso => "proceso",
            Self::Comunicacion => "comunicacion",
            Self::Tiempo => "tiempo",
            Self::Calidad => "calidad",
            Self::Personal => "personal",
        }
    }

    /// Business weight used when ranking pain points by impact.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Servicio => 0.9,
            Self::Producto | Self::Calidad => 0.8,
            Self::Precio | Self::Comunicacion => 0.7,
            Self::Proceso | Self::Personal => 0.6,
            Self::Tiempo => 0.5,
        }
    }
}

impl ParseWithDefault for PainCategory {
    fn type_name() -> &'static str {
        "PainCategory"
    }

    fn default_value() -> Self {
        Self::Servicio
    }

    fn try_parse(s: &str) -> Option<Self> {
        let folded = fold_key(s);
        if let Some(found) = Self::ALL.iter().find(|c| c.as_str() == folded) {
            return Some(*found);
        }
        match folded.as_str() {
            "service" | "atencion" => Some(Self::Servicio),
            "product" => Some(Self::Producto),
            "price" | "pricing" | "costo" => Some(Self::Precio),
            "process" => Some(Self::Proceso),
            "communication" => Some(Self::Comunicacion),
            "time" | "timing" | "delay" => Some(Self::Tiempo),
            "quality" => Some(Self::Calidad),
            "staff" | "people" => Some(Self::Personal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Baja,
    Media,
    Alta,
    Critica,
}

impl Severity {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Baja => 0.3,
            Self::Media => 0.6,
            Self::Alta => 0.8,
            Self::Critica => 1.0,
        }
    }
}

impl ParseWithDefault for Severity {
    fn type_name() -> &'static str {
        "Severity"
    }

    fn default_value() -> Self {
        Self::Media
    }

    fn try_parse(s: &str) -> Option<Self> {
        match fold_key(s).as_str() {
            "baja" | "bajo" | "low" | "minor" => Some(Self::Baja),
            "media" | "medio" | "medium" | "moderate" => Some(Self::Media),
            "alta" | "alto" | "high" | "major" => Some(Self::Alta),
            "critica" | "critico" | "critical" | "severe" => Some(Self::Critica),
            _ => None,
        }
    }
}
