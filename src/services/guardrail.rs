//! Post-generation guardrails for model-drafted solutions.
//!
//! Checks performed per paragraph (paragraph = line):
//! 1. Citation coverage: substantive paragraphs should reference an
//!    internal or external source.
//! 2. Source whitelist: every cited `INT`/`WEB` reference must exist in
//!    the evidence set the draft was generated from.
//! 3. Unsafe command filtering: paragraphs containing dangerous patterns
//!    are stripped and flagged.
//!
//! A draft that trips a hard rule comes back cleaned and marked invalid;
//! the resolution pipeline caps its confidence instead of discarding it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::constants::UNSAFE_COMMAND_PATTERNS;

static CITATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(INT|WEB):([^\]]+)\]").unwrap());

/// Issue severity. Only `Error` invalidates the draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One finding against a draft solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub paragraph_index: Option<usize>,
}

impl ValidationIssue {
    fn warning(message: impl Into<String>, paragraph: usize) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            paragraph_index: Some(paragraph),
        }
    }

    fn error(message: impl Into<String>, paragraph: usize) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            paragraph_index: Some(paragraph),
        }
    }
}

/// Validate and possibly clean a drafted solution.
///
/// Returns `(cleaned_text, issues, is_valid)`; `is_valid` is false iff any
/// issue carries `Severity::Error`.
pub fn validate_solution(
    solution_text: &str,
    allowed_internal: &[String],
    allowed_external_indices: &[String],
) -> (String, Vec<ValidationIssue>, bool) {
    let mut issues = Vec::new();
    let mut cleaned_paragraphs: Vec<&str> = Vec::new();

    for (i, para) in solution_text.split('\n').map(str::trim).enumerate() {
        if para.is_empty() {
            cleaned_paragraphs.push(para);
            continue;
        }

        let citations: Vec<(&str, &str)> = CITATION_RE
            .captures_iter(para)
            .map(|c| {
                (
                    c.get(1).map_or("", |m| m.as_str()),
                    c.get(2).map_or("", |m| m.as_str()),
                )
            })
            .collect();

        if citations.is_empty() && para.split_whitespace().count() > 4 {
            issues.push(ValidationIssue::warning("Paragraph lacks citations", i));
        }

        for (kind, reference) in &citations {
            let allowed = match *kind {
                "INT" => allowed_internal.iter().any(|k| k == reference),
                "WEB" => allowed_external_indices.iter().any(|k| k == reference),
                _ => false,
            };
            if !allowed {
                issues.push(ValidationIssue::error(
                    format!("Unknown {kind} citation [{kind}:{reference}]"),
                    i,
                ));
            }
        }

        let lower = para.to_lowercase();
        let unsafe_hits: Vec<&str> = UNSAFE_COMMAND_PATTERNS
            .iter()
            .copied()
            .filter(|pat| lower.contains(&pat.to_lowercase()))
            .collect();
        if !unsafe_hits.is_empty() {
            issues.push(ValidationIssue::error(
                format!("Unsafe command pattern(s): {}", unsafe_hits.join(", ")),
                i,
            ));
            // Paragraph is dropped entirely.
            continue;
        }

        cleaned_paragraphs.push(para);
    }

    let is_valid = !issues.iter().any(|iss| iss.severity == Severity::Error);
    (cleaned_paragraphs.join("\n"), issues, is_valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn cited_paragraphs_pass() {
        let text = "Re-run the posting job as described. [INT:ERP-12]";
        let (cleaned, issues, valid) = validate_solution(text, &internal(&["ERP-12"]), &[]);
        assert_eq!(cleaned, text);
        assert!(issues.is_empty());
        assert!(valid);
    }

    #[test]
    fn long_uncited_paragraph_warns_but_stays_valid() {
        let text = "Restart the integration service and watch the queue drain";
        let (cleaned, issues, valid) = validate_solution(text, &[], &[]);
        assert_eq!(cleaned, text);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(valid);
    }

    #[test]
    fn short_uncited_paragraph_is_tolerated() {
        let (_, issues, valid) = validate_solution("Done.", &[], &[]);
        assert!(issues.is_empty());
        assert!(valid);
    }

    #[test]
    fn unknown_internal_citation_is_an_error() {
        let text = "Apply the fix from the earlier case. [INT:GHOST-1]";
        let (_, issues, valid) = validate_solution(text, &internal(&["ERP-12"]), &[]);
        assert!(!valid);
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Error && i.message.contains("GHOST-1")));
    }

    #[test]
    fn unknown_external_index_is_an_error() {
        let text = "See the vendor advisory. [WEB:3]";
        let (_, _, valid) = validate_solution(text, &[], &["1".into(), "2".into()]);
        assert!(!valid);
    }

    #[test]
    fn unsafe_paragraph_is_stripped_and_invalidates() {
        let text = "Run DROP TABLE users; to clean up [INT:ERP-12]\nThen verify the report [INT:ERP-12]";
        let (cleaned, issues, valid) = validate_solution(text, &internal(&["ERP-12"]), &[]);
        assert!(!cleaned.to_lowercase().contains("drop table"));
        assert!(cleaned.contains("Then verify the report"));
        assert!(!valid);
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Error && i.message.contains("DROP TABLE")));
    }

    #[test]
    fn unsafe_match_is_case_insensitive() {
        let (cleaned, _, valid) = validate_solution("please drop table audit_log now", &[], &[]);
        assert!(cleaned.is_empty());
        assert!(!valid);
    }

    #[test]
    fn blank_lines_are_preserved() {
        let text = "Step one [INT:K1]\n\nStep two [INT:K1]";
        let (cleaned, _, valid) = validate_solution(text, &internal(&["K1"]), &[]);
        assert_eq!(cleaned, "Step one [INT:K1]\n\nStep two [INT:K1]");
        assert!(valid);
    }
}
