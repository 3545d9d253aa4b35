//! Semantic retrieval over the solved-ticket corpus.
//!
//! Embeds ticket text with a sentence-embedding model, searches the
//! pgvector-backed corpus by L2 distance, detects near-duplicate tickets,
//! and clusters retrieved items into representatives so prompts are not
//! padded with redundant evidence.
//!
//! The embedding model is heavyweight, so it loads lazily on first use
//! behind [`LazyEmbedder`]; the HTTP surface stays responsive at startup.

pub mod cluster;
pub mod embedder;
pub mod store;
pub mod types;

pub use cluster::{cluster_representatives, cosine_similarity};
pub use embedder::{CandleEmbedder, HashingEmbedder, LazyEmbedder, TextEmbedder};
pub use store::{
    RetrievalService, DEFAULT_MAX_DISTANCE, DEFAULT_TOP_K, DUPLICATE_THRESHOLD,
};
pub use types::{RetrievalError, SimilarTicket, SolvedTicketRecord};

/// Embedding dimension shared by the solved-ticket corpus and the external
/// document cache.
pub const EMBEDDING_DIM: usize = 384;
