//! Heuristic ticket priority from text content.
//!
//! Priority scale: P1 (critical), P2 (elevated), P3 (normal). Keyword
//! tables are checked in order; the first match wins, which keeps the
//! classification deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const P1_KEYWORDS: &[&str] = &[
    "production down",
    "system down",
    "cannot login",
    "data loss",
    "critical",
    "outage",
];

const P2_KEYWORDS: &[&str] = &[
    "slow",
    "performance",
    "failed",
    "error",
    "timeout",
    "degraded",
];

static ERROR_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"error\s+\d{3,}").unwrap());

/// Ticket priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify ticket priority from summary and description text.
pub fn classify_priority(
    summary: Option<&str>,
    description: Option<&str>,
) -> (Priority, String) {
    let text = format!(
        "{}\n{}",
        summary.unwrap_or_default(),
        description.unwrap_or_default()
    )
    .to_lowercase();

    for kw in P1_KEYWORDS {
        if text.contains(kw) {
            return (Priority::P1, format!("Matched critical keyword '{kw}'"));
        }
    }
    for kw in P2_KEYWORDS {
        if text.contains(kw) {
            return (Priority::P2, format!("Matched elevated keyword '{kw}'"));
        }
    }
    if ERROR_CODE_RE.is_match(&text) {
        return (Priority::P2, "Found numeric error code".to_string());
    }
    (Priority::P3, "No priority keywords found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p1_keyword_matches() {
        let (p, reason) = classify_priority(Some("Production down after upgrade"), None);
        assert_eq!(p, Priority::P1);
        assert!(reason.contains("production down"));
    }

    #[test]
    fn p1_wins_over_p2_keywords() {
        // "outage" (P1) and "slow" (P2) both present; P1 table is checked first.
        let (p, _) = classify_priority(Some("slow responses during outage"), None);
        assert_eq!(p, Priority::P1);
    }

    #[test]
    fn p2_keyword_matches() {
        let (p, _) = classify_priority(None, Some("report generation is slow"));
        assert_eq!(p, Priority::P2);
    }

    #[test]
    fn numeric_error_code_is_p2() {
        let (p, _) = classify_priority(None, Some("posting stops with error 50042"));
        assert_eq!(p, Priority::P2);
    }

    #[test]
    fn short_codes_do_not_escalate() {
        let (p, _) = classify_priority(None, Some("see note 42 for details"));
        assert_eq!(p, Priority::P3);
    }

    #[test]
    fn default_is_p3() {
        let (p, reason) = classify_priority(Some("Question about report layout"), None);
        assert_eq!(p, Priority::P3);
        assert_eq!(reason, "No priority keywords found");
    }
}
