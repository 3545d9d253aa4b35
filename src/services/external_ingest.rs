//! Ingest external (or heuristic) search results into the document cache.
//!
//! Documents are keyed by URL. A changed content hash refreshes the stored
//! text, title, and embedding in place; every upsert pushes the expiry
//! window forward.

use std::sync::Arc;

use assistiq_retrieval::LazyEmbedder;
use chrono::{Duration, Utc};
use pgvector::Vector;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::debug;

use super::web_search::SearchResult;

/// Cache lifetime for an ingested document.
const DEFAULT_TTL_DAYS: i64 = 7;

/// Content snippet length handed to synthesis prompts.
const PROMPT_CONTENT_LEN: usize = 1500;

/// Normalized external source ready for prompting.
#[derive(Debug, Clone)]
pub struct IngestedDoc {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Errors from ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("embedding error: {0}")]
    Embedding(String),
}

/// Content-hashed external document cache.
pub struct ExternalIngestService {
    pool: PgPool,
    embedder: Arc<LazyEmbedder>,
    ttl_days: i64,
}

impl ExternalIngestService {
    pub fn new(pool: PgPool, embedder: Arc<LazyEmbedder>) -> Self {
        Self {
            pool,
            embedder,
            ttl_days: DEFAULT_TTL_DAYS,
        }
    }

    /// Upsert raw search results and return normalized sources. The
    /// snippet stands in for full page content in heuristic mode.
    pub async fn ingest_results(
        &self,
        raw_results: &[SearchResult],
    ) -> Result<Vec<IngestedDoc>, IngestError> {
        let mut ingested = Vec::with_capacity(raw_results.len());
        for result in raw_results {
            let content = if result.snippet.is_empty() {
                result.title.clone()
            } else {
                result.snippet.clone()
            };
            self.upsert_doc(&result.url, &result.title, &content).await?;
            ingested.push(IngestedDoc {
                url: result.url.clone(),
                title: result.title.clone(),
                content: content.chars().take(PROMPT_CONTENT_LEN).collect(),
            });
        }
        Ok(ingested)
    }

    async fn upsert_doc(&self, url: &str, title: &str, content: &str) -> Result<(), IngestError> {
        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        let expires_at = Utc::now() + Duration::days(self.ttl_days);

        let existing_hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM external_docs WHERE url = $1")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        if existing_hash.as_deref() == Some(content_hash.as_str()) {
            // Unchanged content: just extend the expiry.
            sqlx::query("UPDATE external_docs SET expires_at = $2 WHERE url = $1")
                .bind(url)
                .bind(expires_at)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        let embedder = self
            .embedder
            .get()
            .await
            .map_err(|e| IngestError::Embedding(e.to_string()))?;
        let embedding = embedder
            .embed(content)
            .map_err(|e| IngestError::Embedding(e.to_string()))?;

        debug!(url, "refreshing external document");
        sqlx::query(
            r#"
            INSERT INTO external_docs
                (url, domain, title, content_text, content_hash, embedding, fetched_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
            ON CONFLICT (url) DO UPDATE SET
                title = EXCLUDED.title,
                content_text = EXCLUDED.content_text,
                content_hash = EXCLUDED.content_hash,
                embedding = EXCLUDED.embedding,
                fetched_at = now(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(url)
        .bind(extract_domain(url))
        .bind(title)
        .bind(content)
        .bind(&content_hash)
        .bind(Vector::from(embedding))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn extract_domain(url: &str) -> Option<String> {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .map(|d| d.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_extraction() {
        assert_eq!(
            extract_domain("https://assistiq.local/faux/abc"),
            Some("assistiq.local".to_string())
        );
        assert_eq!(extract_domain("not-a-url"), None);
    }

    #[test]
    fn content_hash_is_stable() {
        let a = hex::encode(Sha256::digest(b"same content"));
        let b = hex::encode(Sha256::digest(b"same content"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
