//! External web search with a deterministic heuristic fallback.
//!
//! The real provider (Tavily) is used when a credential is configured;
//! any provider failure transparently falls back to the heuristic, which
//! fabricates stable pseudo-results from the query text itself so the
//! downstream pipeline stays exercisable offline. Every call, real or
//! heuristic, leaves one audit row keyed by the normalized query hash.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::db_service::DbService;
use crate::config::Settings;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const TAVILY_TIMEOUT: Duration = Duration::from_secs(25);
/// Queries are truncated before hashing and audit.
const MAX_QUERY_LEN: usize = 8000;
const MAX_NORMALIZED_LEN: usize = 500;

/// One shaped search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: Option<String>,
    title: Option<String>,
    content: Option<String>,
}

/// Web search abstraction over Tavily plus the heuristic fallback.
pub struct WebSearchService {
    enabled: bool,
    tavily_api_key: Option<String>,
    client: Client,
    db: Arc<DbService>,
}

impl WebSearchService {
    pub fn new(settings: &Settings, db: Arc<DbService>) -> Self {
        let client = Client::builder()
            .timeout(TAVILY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            enabled: settings.enable_web_search,
            tavily_api_key: settings.tavily_api_key.clone(),
            client,
            db,
        }
    }

    /// Collapse whitespace and lowercase for audit hashing.
    pub fn normalize_query(text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let lowered = collapsed.to_lowercase();
        lowered.chars().take(MAX_NORMALIZED_LEN).collect()
    }

    /// Search for external context. Never fails: provider errors fall back
    /// to the heuristic; a disabled service returns nothing.
    pub async fn search(&self, ticket_text: &str, max_results: usize) -> Vec<SearchResult> {
        if !self.enabled {
            return Vec::new();
        }

        let query: String = ticket_text.trim().chars().take(MAX_QUERY_LEN).collect();
        let norm_hash = hex::encode(Sha256::digest(Self::normalize_query(&query)));

        if let Some(api_key) = &self.tavily_api_key {
            match self.tavily_search(api_key, &query, max_results).await {
                Ok(results) if !results.is_empty() => {
                    self.audit(&query, &norm_hash, "tavily", results.len()).await;
                    info!("Tavily returned {} results", results.len());
                    return results;
                }
                Ok(_) => {
                    // Empty result set still counts as a provider answer.
                    self.audit(&query, &norm_hash, "tavily", 0).await;
                    return Vec::new();
                }
                Err(e) => {
                    warn!("Tavily failure: {}; falling back to heuristic", e);
                }
            }
        }

        let results = heuristic_results(ticket_text, max_results);
        self.audit(&query, &norm_hash, "heuristic", results.len()).await;
        results
    }

    async fn tavily_search(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, reqwest::Error> {
        let body = TavilyRequest {
            api_key,
            query,
            max_results,
            search_depth: "advanced",
        };
        let response = self
            .client
            .post(TAVILY_URL)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: TavilyResponse = response.json().await?;

        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .filter_map(|r| {
                r.url.map(|url| SearchResult {
                    url,
                    title: r.title.unwrap_or_else(|| "Untitled".to_string()),
                    snippet: r
                        .content
                        .unwrap_or_default()
                        .chars()
                        .take(600)
                        .collect(),
                })
            })
            .collect())
    }

    async fn audit(&self, query: &str, norm_hash: &str, provider: &str, count: usize) {
        // Audit failures never break the search path.
        if let Err(e) = self.db.add_search_audit(query, norm_hash, provider, count).await {
            warn!("audit insert failed: {}", e);
        }
    }
}

/// Deterministic pseudo-results: the longest non-empty lines of the query,
/// hashed into stable local URLs.
pub fn heuristic_results(ticket_text: &str, max_results: usize) -> Vec<SearchResult> {
    let mut lines: Vec<&str> = ticket_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines.sort_by_key(|l| std::cmp::Reverse(l.len()));

    lines
        .into_iter()
        .take(max_results)
        .enumerate()
        .map(|(i, line)| {
            let hash = hex::encode(Sha256::digest(line.as_bytes()));
            SearchResult {
                url: format!("https://assistiq.local/faux/{}", &hash[..10]),
                title: format!("Heuristic Context {}", i + 1),
                snippet: line.chars().take(180).collect(),
            }
        })
        .collect()
}
