//! Compliance scrubbing of ticket text before it leaves the process.
//!
//! Fast regex redaction of emails, API-key-shaped tokens, long hex and
//! base64 runs, and JWT-shaped strings. Applied to every text payload
//! handed to a model provider.

use once_cell::sync::Lazy;
use regex::Regex;

/// Literal token substituted for each redacted match.
pub const REDACTION_TOKEN: &str = "[REDACTED]";

static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Email addresses
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
        // API-key-like tokens (sk_..., api-..., key_...)
        Regex::new(r"(?i)\b(?:sk|api|key)[_-][A-Za-z0-9]{8,}\b").unwrap(),
        // Long hex runs
        Regex::new(r"(?i)\b[a-f0-9]{32,}\b").unwrap(),
        // Long base64-like runs
        Regex::new(r"\b[A-Za-z0-9+/]{40,}={0,2}\b").unwrap(),
        // Three-segment JWT-shaped tokens
        Regex::new(r"\b[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\b").unwrap(),
    ]
});

/// Redact sensitive tokens. Returns the cleaned text and the number of
/// redactions applied, in pattern order.
pub fn scrub(text: &str) -> (String, usize) {
    let mut redacted = text.to_string();
    let mut count = 0;
    for pattern in PATTERNS.iter() {
        count += pattern.find_iter(&redacted).count();
        redacted = pattern.replace_all(&redacted, REDACTION_TOKEN).to_string();
    }
    (redacted, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_emails() {
        let (out, n) = scrub("Contact jane.doe@example.com for access");
        assert_eq!(out, "Contact [REDACTED] for access");
        assert_eq!(n, 1);
    }

    #[test]
    fn redacts_api_keys() {
        let (out, n) = scrub("token sk_live4f9AbkQ2x7 in config");
        assert!(out.contains(REDACTION_TOKEN));
        assert!(!out.contains("sk_live4f9AbkQ2x7"));
        assert_eq!(n, 1);
    }

    #[test]
    fn redacts_long_hex_runs() {
        let hex = "a".repeat(16) + &"1".repeat(16);
        let (out, n) = scrub(&format!("session id {hex}"));
        assert_eq!(out, format!("session id {REDACTION_TOKEN}"));
        assert_eq!(n, 1);
    }

    #[test]
    fn redacts_jwt_shaped_tokens() {
        let (out, n) = scrub("auth header eyJhbGc.eyJzdWI.SflKxwRJ present");
        assert_eq!(out, format!("auth header {REDACTION_TOKEN} present"));
        assert_eq!(n, 1);
    }

    #[test]
    fn clean_text_passes_through() {
        let text = "Invoice 4711 is stuck in posting since yesterday";
        let (out, n) = scrub(text);
        assert_eq!(out, text);
        assert_eq!(n, 0);
    }

    #[test]
    fn counts_multiple_redactions() {
        let (_, n) = scrub("a@b.com and c@d.org plus key_ABCDEFGH1234");
        assert_eq!(n, 3);
    }
}
