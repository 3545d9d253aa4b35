//! Sentence embedding.
//!
//! [`CandleEmbedder`] runs BAAI/bge-small-en-v1.5 (384 dimensions, CLS
//! pooling, L2-normalized output) on CPU via Candle. Corpus entries and
//! queries are embedded symmetrically.
//!
//! [`HashingEmbedder`] is a deterministic stand-in for tests and offline
//! environments; it produces unit-norm vectors of the same width.

use std::sync::Arc;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::types::RetrievalError;
use crate::EMBEDDING_DIM;

/// Model repository on HuggingFace Hub.
const MODEL_REPO: &str = "BAAI/bge-small-en-v1.5";

/// Text to fixed-width vector.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// BGE-small-en-v1.5 embedder backed by Candle.
pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl CandleEmbedder {
    /// Load the model, downloading it into the HuggingFace cache if needed.
    /// First download is ~130MB.
    pub fn new() -> Result<Self> {
        Self::with_model(MODEL_REPO)
    }

    pub fn with_model(model_name: &str) -> Result<Self> {
        info!("Loading embedding model: {}", model_name);

        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("Failed to read config.json")?,
        )
        .context("Failed to parse config.json")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("Failed to load model weights")?
        };
        let model = BertModel::load(vb, &config).context("Failed to build BERT model")?;

        info!("Embedding model loaded ({} dims)", EMBEDDING_DIM);

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn forward_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_input_ids = Vec::new();
        let mut all_attention_mask = Vec::new();
        let mut all_token_type_ids = Vec::new();

        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut attention = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();

            ids.resize(max_len, 0);
            attention.resize(max_len, 0);
            type_ids.resize(max_len, 0);

            all_input_ids.extend(ids);
            all_attention_mask.extend(attention);
            all_token_type_ids.extend(type_ids);
        }

        let batch_size = texts.len();

        let input_ids =
            Tensor::from_vec(all_input_ids, (batch_size, max_len), &self.device)?
                .to_dtype(DType::U32)?;
        let attention_mask =
            Tensor::from_vec(all_attention_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids =
            Tensor::from_vec(all_token_type_ids, (batch_size, max_len), &self.device)?
                .to_dtype(DType::U32)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // BGE pools via the CLS token (position 0), not mean pooling.
        let cls = output.narrow(1, 0, 1)?.squeeze(1)?;
        let normalized = Self::l2_normalize(&cls)?;

        debug!("Embedded batch of {}", batch_size);
        Ok(normalized.to_vec2::<f32>()?)
    }

    fn l2_normalize(tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor
            .sqr()?
            .sum_keepdim(1)?
            .sqrt()?
            .clamp(1e-12, f64::MAX)?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl TextEmbedder for CandleEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut batch = self.embed_batch(&[text])?;
        Ok(batch.remove(0))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.forward_batch(texts)
            .map_err(|e| RetrievalError::Embedding(e.to_string()))
    }
}

/// Deterministic token-hashing embedder. Unit-norm output, same width as
/// the real model; similar token sets land close together.
#[derive(Debug, Default, Clone)]
pub struct HashingEmbedder;

impl TextEmbedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vector = vec![0f32; EMBEDDING_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
                as usize
                % EMBEDDING_DIM;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// Factory that builds the real embedder on a blocking thread.
type EmbedderFactory =
    Box<dyn Fn() -> Result<Arc<dyn TextEmbedder>, RetrievalError> + Send + Sync>;

/// Lazily-initialized embedder handle.
///
/// The model loads on first use so process startup does not block on a
/// ~130MB download; `/api/health?warm=true` forces the load.
pub struct LazyEmbedder {
    cell: OnceCell<Arc<dyn TextEmbedder>>,
    factory: EmbedderFactory,
}

impl LazyEmbedder {
    pub fn new(factory: EmbedderFactory) -> Self {
        Self {
            cell: OnceCell::new(),
            factory,
        }
    }

    /// Lazy Candle-backed embedder.
    pub fn candle() -> Self {
        Self::new(Box::new(|| {
            CandleEmbedder::new()
                .map(|e| Arc::new(e) as Arc<dyn TextEmbedder>)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))
        }))
    }

    /// Deterministic embedder for tests and offline runs.
    pub fn hashing() -> Self {
        Self::new(Box::new(|| {
            Ok(Arc::new(HashingEmbedder) as Arc<dyn TextEmbedder>)
        }))
    }

    /// Get the embedder, initializing it on first call.
    pub async fn get(&self) -> Result<Arc<dyn TextEmbedder>, RetrievalError> {
        self.cell
            .get_or_try_init(|| async {
                let factory = &self.factory;
                factory()
            })
            .await
            .cloned()
    }

    /// Whether the model has been initialized.
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder;
        let a = embedder.embed("invoice posting failed").unwrap();
        let b = embedder.embed("invoice posting failed").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_texts_differ() {
        let embedder = HashingEmbedder;
        let a = embedder.embed("invoice posting failed").unwrap();
        let b = embedder.embed("ledger export timeout").unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn lazy_embedder_initializes_once() {
        let lazy = LazyEmbedder::hashing();
        assert!(!lazy.is_loaded());

        let first = lazy.get().await.unwrap();
        assert!(lazy.is_loaded());
        let second = lazy.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[ignore = "Requires model download"]
    fn candle_embedder_output_is_normalized() {
        let embedder = CandleEmbedder::new().expect("Failed to load embedder");
        let embedding = embedder.embed("invoice stuck in posting").unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }
}
