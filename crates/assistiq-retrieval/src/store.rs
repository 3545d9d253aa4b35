//! pgvector-backed search over the solved-ticket corpus.

use std::sync::Arc;

use pgvector::Vector;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};

use crate::embedder::LazyEmbedder;
use crate::types::{RetrievalError, SimilarTicket, SolvedTicketRecord};

/// Default result count for resolution retrieval.
pub const DEFAULT_TOP_K: usize = 8;
/// Default L2 distance bound for resolution retrieval.
pub const DEFAULT_MAX_DISTANCE: f64 = 1.0;
/// L2 distance below which the nearest solved ticket counts as a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 0.35;

/// Retrieval surface over the solved-ticket corpus.
pub struct RetrievalService {
    pool: PgPool,
    embedder: Arc<LazyEmbedder>,
}

impl RetrievalService {
    pub fn new(pool: PgPool, embedder: Arc<LazyEmbedder>) -> Self {
        Self { pool, embedder }
    }

    pub fn embedder(&self) -> &Arc<LazyEmbedder> {
        &self.embedder
    }

    /// Find the `top_k` nearest solved tickets by L2 distance, ascending.
    /// Hits beyond `max_distance` are dropped when a bound is given.
    #[instrument(skip(self, query_text))]
    pub async fn find_similar(
        &self,
        query_text: &str,
        top_k: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<SimilarTicket>, RetrievalError> {
        let embedder = self.embedder.get().await?;
        let query_embedding = Vector::from(embedder.embed(query_text)?);

        let rows = sqlx::query_as::<_, (String, Option<String>, Option<String>, f64)>(
            r#"
            SELECT
                ticket_key,
                summary,
                resolution,
                embedding <-> $1::vector AS distance
            FROM solved_tickets
            ORDER BY distance
            LIMIT $2
            "#,
        )
        .bind(&query_embedding)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<SimilarTicket> = rows
            .into_iter()
            .filter(|(_, _, _, distance)| match max_distance {
                Some(bound) => *distance <= bound,
                None => true,
            })
            .map(|(ticket_key, summary, resolution, distance)| SimilarTicket {
                ticket_key,
                summary: summary.unwrap_or_default(),
                resolution: resolution.unwrap_or_default(),
                distance,
            })
            .collect();

        debug!("Found {} similar tickets within bound", hits.len());
        Ok(hits)
    }

    /// Return the nearest solved ticket only if it is close enough to count
    /// as a duplicate of the query.
    pub async fn find_potential_duplicate(
        &self,
        query_text: &str,
        threshold: f64,
    ) -> Result<Option<SimilarTicket>, RetrievalError> {
        let nearest = self.find_similar(query_text, 1, None).await?;
        Ok(nearest
            .into_iter()
            .next()
            .filter(|hit| hit.distance < threshold))
    }

    /// Embed and upsert solved tickets by `ticket_key`. Content changes
    /// regenerate the stored embedding.
    pub async fn upsert_solved_tickets(
        &self,
        records: &[SolvedTicketRecord],
    ) -> Result<usize, RetrievalError> {
        if records.is_empty() {
            return Ok(0);
        }

        let embedder = self.embedder.get().await?;
        let texts: Vec<String> = records.iter().map(|r| r.embedding_text()).collect();
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        info!("Generating embeddings for {} tickets", refs.len());
        let embeddings = embedder.embed_batch(&refs)?;

        let mut tx = self.pool.begin().await?;
        for (record, embedding) in records.iter().zip(embeddings) {
            sqlx::query(
                r#"
                INSERT INTO solved_tickets (ticket_key, summary, description, resolution, embedding)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (ticket_key) DO UPDATE SET
                    summary = EXCLUDED.summary,
                    description = EXCLUDED.description,
                    resolution = EXCLUDED.resolution,
                    embedding = EXCLUDED.embedding
                "#,
            )
            .bind(&record.ticket_key)
            .bind(&record.summary)
            .bind(&record.description)
            .bind(&record.resolution)
            .bind(Vector::from(embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len())
    }

    /// Look up a stored resolution text by ticket key.
    pub async fn get_resolution(
        &self,
        ticket_key: &str,
    ) -> Result<Option<String>, RetrievalError> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT resolution FROM solved_tickets WHERE ticket_key = $1",
        )
        .bind(ticket_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(resolution,)| resolution))
    }

    /// Embed free-form texts for clustering. Embedding failures surface;
    /// callers decide whether clustering is optional.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let embedder = self.embedder.get().await?;
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        embedder.embed_batch(&refs).map_err(|e| {
            warn!("Batch embedding for clustering failed: {}", e);
            e
        })
    }
}
