//! Typed activity inputs and outputs.
//!
//! These records cross the engine boundary as JSON; defaults on optional
//! fields keep older payload shapes deserializable.

use serde::{Deserialize, Serialize};

use crate::services::priority::Priority;

/// Input for the validation workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketValidationInput {
    pub ticket_key: String,
}

/// Everything extracted from a ticket, ready for the model to analyze.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketContext {
    pub bundled_text: String,
    #[serde(default)]
    pub reporter_id: Option<String>,
    #[serde(default)]
    pub image_attachments: Vec<Vec<u8>>,
}

/// Validation verdict states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Complete,
    Incomplete,
    Error,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "complete" => Self::Complete,
            "incomplete" => Self::Incomplete,
            _ => Self::Error,
        }
    }
}

/// Structured result of the validation activity, enriched with priority,
/// vagueness, and duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmVerdict {
    pub module: String,
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    pub llm_provider_model: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub is_vague: bool,
    #[serde(default)]
    pub vagueness_reason: Option<String>,
    #[serde(default)]
    pub duplicate_of: Option<String>,
    /// Advisory entities pulled out heuristically, e.g. an invoice id the
    /// reporter already supplied. Not persisted.
    #[serde(default)]
    pub context_entities: std::collections::BTreeMap<String, String>,
}

/// Input for the resolution workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionInput {
    pub ticket_key: String,
    pub ticket_bundled_text: String,
}

/// A human-approved solution headed for the ticket platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedSolution {
    pub solution_text: String,
    #[serde(default = "default_provider")]
    pub llm_provider_model: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

fn default_provider() -> String {
    "human-approved".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_roundtrips_through_json() {
        let verdict = LlmVerdict {
            module: "AP.Invoice".into(),
            validation_status: ValidationStatus::Incomplete,
            missing_fields: vec!["Amount".into()],
            confidence: 0.8,
            llm_provider_model: "gemini-2.0-flash".into(),
            priority: Some(Priority::P2),
            is_vague: false,
            vagueness_reason: None,
            duplicate_of: None,
            context_entities: Default::default(),
        };
        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(value["validation_status"], "incomplete");
        let back: LlmVerdict = serde_json::from_value(value).unwrap();
        assert_eq!(back.validation_status, ValidationStatus::Incomplete);
        assert_eq!(back.missing_fields, vec!["Amount"]);
    }

    #[test]
    fn verdict_inflates_from_a_sparse_map() {
        // The engine may deliver a generic object map with fields missing.
        let back: LlmVerdict = serde_json::from_value(json!({
            "module": "Unknown",
            "validation_status": "error",
            "llm_provider_model": "all_failed"
        }))
        .unwrap();
        assert_eq!(back.validation_status, ValidationStatus::Error);
        assert!(back.missing_fields.is_empty());
        assert!(back.duplicate_of.is_none());
    }

    #[test]
    fn solution_defaults_to_human_approved() {
        let solution: SynthesizedSolution =
            serde_json::from_value(json!({ "solution_text": "Do the fix" })).unwrap();
        assert_eq!(solution.llm_provider_model, "human-approved");
    }

    #[test]
    fn status_parse_is_total() {
        assert_eq!(ValidationStatus::parse("complete"), ValidationStatus::Complete);
        assert_eq!(ValidationStatus::parse("incomplete"), ValidationStatus::Incomplete);
        assert_eq!(ValidationStatus::parse("anything"), ValidationStatus::Error);
    }
}
