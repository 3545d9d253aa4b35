//! Shared retrieval types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the retrieval surface.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding model error: {0}")]
    Embedding(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One nearest-neighbor hit from the solved-ticket corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarTicket {
    pub ticket_key: String,
    pub summary: String,
    pub resolution: String,
    /// L2 distance to the query embedding; smaller is closer.
    pub distance: f64,
}

/// Input row for corpus ingestion.
#[derive(Debug, Clone)]
pub struct SolvedTicketRecord {
    pub ticket_key: String,
    pub summary: String,
    pub description: Option<String>,
    pub resolution: String,
}

impl SolvedTicketRecord {
    /// Canonical text bundle fed to the embedding model. Re-embedding is
    /// driven by changes to this text.
    pub fn embedding_text(&self) -> String {
        format!(
            "Ticket: {}\nSummary: {}\nDescription: {}\nResolution: {}",
            self.ticket_key,
            self.summary,
            self.description.as_deref().unwrap_or(""),
            self.resolution
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_is_canonical() {
        let record = SolvedTicketRecord {
            ticket_key: "ERP-7".into(),
            summary: "Invoice stuck".into(),
            description: None,
            resolution: "Re-run the posting job".into(),
        };
        let text = record.embedding_text();
        assert!(text.starts_with("Ticket: ERP-7\nSummary: Invoice stuck\n"));
        assert!(text.ends_with("Resolution: Re-run the posting job"));
    }
}
