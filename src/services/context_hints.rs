//! Cheap heuristic context extraction.
//!
//! A keyword classifier guesses the business module and a handful of
//! regexes pull out the entities that commonly decide completeness
//! (invoice id, amount, date, PO number, vendor). The hints ride along
//! with the model verdict as advisory context; they never override it.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Advisory hints derived without a model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextHints {
    pub module_hint: String,
    pub entities: BTreeMap<String, String>,
}

const INVOICE_KEYWORDS: &[&str] = &["invoice", "inv", "billing", "payment", "remittance"];
const PO_KEYWORDS: &[&str] = &["purchase order", "po", "procurement", "vendor", "supplier"];

static ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "Invoice ID",
            Regex::new(r"(?i)(?:invoice\s*id|inv\s*id|id)\s*[:\s-]*([A-Z0-9-]+)\b").unwrap(),
        ),
        (
            "Amount",
            Regex::new(r"(?i)\b(?:amount|total)\b\s*(?:is|of|:)?\s*\$?((?:\d{1,3},)*\d{1,3}\.\d{2})\b")
                .unwrap(),
        ),
        (
            "Invoice Date",
            Regex::new(
                r"(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s\d{1,2},\s\d{4})",
            )
            .unwrap(),
        ),
        (
            "PO Number",
            Regex::new(r"(?i)po\s*(?:number|#)\s*[:\s]*([A-Z0-9-]+)\b").unwrap(),
        ),
        (
            "Vendor Name",
            Regex::new(r"(?i)(?:vendor|supplier)\s*[:\s]*([A-Za-z\s,]+(?:Inc\.|Corp\.|Ltd\.))").unwrap(),
        ),
    ]
});

/// Guess the business module from keyword presence.
pub fn classify_context(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if INVOICE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return "AP.Invoice";
    }
    if PO_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return "PO.Creation";
    }
    "General.Inquiry"
}

/// Extract well-known entities; first match per entity wins.
pub fn extract_entities(text: &str) -> BTreeMap<String, String> {
    let mut entities = BTreeMap::new();
    for (name, pattern) in ENTITY_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            // Value is the last capture group.
            if let Some(value) = caps.iter().flatten().last() {
                entities.insert(name.to_string(), value.as_str().trim().to_string());
            }
        }
    }
    entities
}

pub fn derive_hints(text: &str) -> ContextHints {
    ContextHints {
        module_hint: classify_context(text).to_string(),
        entities: extract_entities(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_keywords_route_to_ap() {
        assert_eq!(classify_context("please pay this invoice"), "AP.Invoice");
    }

    #[test]
    fn po_keywords_route_to_procurement() {
        assert_eq!(
            classify_context("new purchase order for supplies"),
            "PO.Creation"
        );
    }

    #[test]
    fn unmatched_text_is_general() {
        assert_eq!(classify_context("how do I reset my dashboard"), "General.Inquiry");
    }

    #[test]
    fn extracts_invoice_id_and_amount() {
        let entities =
            extract_entities("Invoice ID: INV-2024-001, total is $1,250.00 due soon");
        assert_eq!(entities.get("Invoice ID").unwrap(), "INV-2024-001");
        assert_eq!(entities.get("Amount").unwrap(), "1,250.00");
    }

    #[test]
    fn extracts_iso_date() {
        let entities = extract_entities("dated 2024-03-15 per attachment");
        assert_eq!(entities.get("Invoice Date").unwrap(), "2024-03-15");
    }

    #[test]
    fn missing_entities_are_absent() {
        let entities = extract_entities("nothing useful here");
        assert!(entities.is_empty());
    }
}
