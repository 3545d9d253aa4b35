//! Ticket platform client.
//!
//! Thin REST client for the issue tracker: fetch ticket details, search a
//! project, download attachments, comment, and reassign. Reassignment uses
//! the direct assignee endpoint, which is the reliable way to assign by
//! account id.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the ticket platform.
#[derive(Debug, thiserror::Error)]
pub enum JiraError {
    #[error("ticket platform credentials are not fully configured")]
    MissingConfig,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ticket platform returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Attachment metadata from a ticket.
#[derive(Debug, Clone)]
pub struct AttachmentMeta {
    pub filename: String,
    pub url: String,
    pub mime_type: String,
}

/// Everything the validation pipeline needs from a ticket.
#[derive(Debug, Clone, Default)]
pub struct TicketDetails {
    pub summary: String,
    pub description: Option<String>,
    pub reporter_id: Option<String>,
    pub attachments: Vec<AttachmentMeta>,
}

impl TicketDetails {
    /// Split attachments by whether they go to the model as raw images.
    pub fn partition_attachments(&self) -> (Vec<&AttachmentMeta>, Vec<&AttachmentMeta>) {
        self.attachments
            .iter()
            .partition(|a| a.mime_type.starts_with("image/"))
    }
}

/// Key plus last-updated timestamp, as seen by the polling loop.
#[derive(Debug, Clone)]
pub struct TicketRef {
    pub key: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    fields: IssueFields,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct IssueFields {
    summary: Option<String>,
    description: Option<String>,
    reporter: Option<Reporter>,
    attachment: Vec<Attachment>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reporter {
    #[serde(rename = "accountId")]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    filename: Option<String>,
    content: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

/// Authenticated client for the ticket platform.
pub struct JiraClient {
    base_url: String,
    username: String,
    api_token: String,
    client: Client,
}

impl JiraClient {
    /// Fails fast when credentials are missing (config-error taxonomy).
    pub fn new(settings: &Settings) -> Result<Self, JiraError> {
        let (base_url, username, api_token) = match (
            &settings.jira_url,
            &settings.jira_username,
            &settings.jira_api_token,
        ) {
            (Some(url), Some(user), Some(token)) => {
                (url.trim_end_matches('/').to_string(), user.clone(), token.clone())
            }
            _ => return Err(JiraError::MissingConfig),
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Ok(Self {
            base_url,
            username,
            api_token,
            client,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.api_token))
            .header("Accept", "application/json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, JiraError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(JiraError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Fetch summary, description, reporter, and attachment metadata.
    pub async fn get_ticket_details(&self, ticket_key: &str) -> Result<TicketDetails, JiraError> {
        debug!(ticket_key, "fetching ticket details");
        let response = self
            .get(&format!(
                "/rest/api/2/issue/{ticket_key}?fields=summary,description,reporter,attachment"
            ))
            .send()
            .await?;
        let issue: IssueResponse = Self::check(response).await?.json().await?;

        Ok(TicketDetails {
            summary: issue.fields.summary.unwrap_or_default(),
            description: issue.fields.description,
            reporter_id: issue.fields.reporter.and_then(|r| r.account_id),
            attachments: issue
                .fields
                .attachment
                .into_iter()
                .filter_map(|a| match (a.filename, a.content) {
                    (Some(filename), Some(url)) => Some(AttachmentMeta {
                        filename,
                        url,
                        mime_type: a.mime_type.unwrap_or_default(),
                    }),
                    _ => None,
                })
                .collect(),
        })
    }

    /// List tickets in a project with their last-updated timestamps.
    pub async fn search_project(
        &self,
        project: &str,
        max_results: usize,
    ) -> Result<Vec<TicketRef>, JiraError> {
        let jql = format!("project = {project} ORDER BY updated DESC");
        let max_results = max_results.to_string();
        let response = self
            .get("/rest/api/2/search")
            .query(&[
                ("jql", jql.as_str()),
                ("fields", "updated"),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await?;
        let search: SearchResponse = Self::check(response).await?.json().await?;

        Ok(search
            .issues
            .into_iter()
            .map(|issue| TicketRef {
                key: issue.key,
                updated_at: issue.fields.updated.as_deref().and_then(parse_jira_timestamp),
            })
            .collect())
    }

    /// Download raw attachment content.
    pub async fn download_attachment(&self, url: &str) -> Result<Vec<u8>, JiraError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Add a comment. The safe fallback action for every side-effect.
    pub async fn add_comment(&self, ticket_key: &str, comment: &str) -> Result<(), JiraError> {
        info!(ticket_key, "adding comment");
        let response = self
            .client
            .post(format!(
                "{}/rest/api/2/issue/{ticket_key}/comment",
                self.base_url
            ))
            .basic_auth(&self.username, Some(&self.api_token))
            .json(&json!({ "body": comment }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Comment, then reassign via the direct assignee endpoint. The caller
    /// degrades to comment-only when reassignment fails.
    pub async fn comment_and_reassign(
        &self,
        ticket_key: &str,
        comment: &str,
        assignee_id: &str,
    ) -> Result<(), JiraError> {
        self.add_comment(ticket_key, comment).await?;

        debug!(ticket_key, assignee_id, "reassigning ticket");
        let response = self
            .client
            .put(format!(
                "{}/rest/api/2/issue/{ticket_key}/assignee",
                self.base_url
            ))
            .basic_auth(&self.username, Some(&self.api_token))
            .json(&json!({ "accountId": assignee_id }))
            .send()
            .await?;
        Self::check(response).await.map_err(|e| {
            warn!(ticket_key, "reassignment failed: {}", e);
            e
        })?;
        Ok(())
    }
}

/// Issue timestamps arrive as `2024-03-15T10:30:00.000+0000`; tolerate
/// RFC3339 as well.
fn parse_jira_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_fail_fast() {
        let mut settings = Settings::from_env();
        settings.jira_url = None;
        assert!(matches!(
            JiraClient::new(&settings),
            Err(JiraError::MissingConfig)
        ));
    }

    #[test]
    fn parses_platform_timestamp_format() {
        let ts = parse_jira_timestamp("2024-03-15T10:30:00.000+0000").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-15T10:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        assert!(parse_jira_timestamp("2024-03-15T10:30:00Z").is_some());
        assert!(parse_jira_timestamp("garbage").is_none());
    }

    #[test]
    fn partitions_image_attachments() {
        let details = TicketDetails {
            summary: "s".into(),
            description: None,
            reporter_id: None,
            attachments: vec![
                AttachmentMeta {
                    filename: "shot.png".into(),
                    url: "http://x/1".into(),
                    mime_type: "image/png".into(),
                },
                AttachmentMeta {
                    filename: "log.txt".into(),
                    url: "http://x/2".into(),
                    mime_type: "text/plain".into(),
                },
            ],
        };
        let (images, others) = details.partition_attachments();
        assert_eq!(images.len(), 1);
        assert_eq!(others.len(), 1);
        assert_eq!(images[0].filename, "shot.png");
    }
}
