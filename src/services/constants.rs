//! Central constants and reusable text fragments.
//!
//! Keeping these in one place prevents string drift between activities,
//! workflows, and the HTTP surface.

/// Fixed suffix appended to every comment posted to the ticket platform.
pub const AGENT_SIGNATURE: &str = "\n\n— AssistIQ Agent";

/// Command patterns stripped from LLM-drafted resolution steps.
pub const UNSAFE_COMMAND_PATTERNS: &[&str] = &[
    "DROP TABLE",
    "DELETE FROM",
    "TRUNCATE ",
    "SHUTDOWN IMMEDIATE",
    "rm -rf /",
    "format c:",
    "ALTER SYSTEM",
    "GRANT ALL",
];

/// Citation markers for internal and external evidence.
pub const INTERNAL_MARKER: &str = "[INT:";
pub const EXTERNAL_MARKER: &str = "[WEB:";

/// Questions returned when a ticket carries too little information to
/// attempt resolution.
pub const FOLLOW_UP_QUESTIONS: &[&str] = &[
    "Which environment is affected (production, test, development)?",
    "What is the exact error message or code you are seeing?",
    "Did anything change recently (deployment, configuration, data load)?",
    "How many users or transactions are impacted?",
];
