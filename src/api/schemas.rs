//! Request and response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};

/// Webhook payload from the ticket platform. Only the event name and the
/// issue key matter; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "webhookEvent", alias = "webhook_event", default)]
    pub webhook_event: String,
    pub issue: Option<WebhookIssue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookIssue {
    pub key: String,
}

impl WebhookPayload {
    /// Validation triggers on issue creation and update; both the bare and
    /// platform-prefixed event names are accepted.
    pub fn triggers_validation(&self) -> bool {
        matches!(
            self.webhook_event.as_str(),
            "issue_created" | "issue_updated" | "jira:issue_created" | "jira:issue_updated"
        )
    }
}

/// Outcome of a tabular upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub status: String,
    pub message: String,
    pub rows_processed: usize,
    pub rows_upserted: usize,
}

/// Body for saving a human draft.
#[derive(Debug, Deserialize)]
pub struct SaveDraftRequest {
    pub draft_text: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Body for posting an approved solution.
#[derive(Debug, Deserialize)]
pub struct PostSolutionRequest {
    pub solution_text: String,
    #[serde(default)]
    pub llm_provider_model: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Health probe result.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub db_ok: bool,
    pub engine_ok: bool,
    pub embedding_model_loaded: bool,
    pub retrieval_only_mode: bool,
}

/// Query params for the health probe.
#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Force the lazy embedding model to load.
    #[serde(default)]
    pub warm: bool,
}

/// Structured error detail returned with every failure status.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webhook_accepts_prefixed_and_bare_event_names() {
        for event in [
            "issue_created",
            "issue_updated",
            "jira:issue_created",
            "jira:issue_updated",
        ] {
            let payload: WebhookPayload = serde_json::from_value(json!({
                "webhookEvent": event,
                "issue": {"key": "ERP-1"}
            }))
            .unwrap();
            assert!(payload.triggers_validation(), "event {event}");
        }
    }

    #[test]
    fn webhook_ignores_other_events() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "webhookEvent": "comment_created",
            "issue": {"key": "ERP-1"}
        }))
        .unwrap();
        assert!(!payload.triggers_validation());
    }

    #[test]
    fn webhook_tolerates_missing_issue() {
        let payload: WebhookPayload =
            serde_json::from_value(json!({"webhookEvent": "issue_created"})).unwrap();
        assert!(payload.issue.is_none());
    }
}
