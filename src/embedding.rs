//! Text-to-vector embedding.
//!
//! [`Embedder`] is the seam the memory store computes vectors through. The
//! production implementation, [`OnnxEmbedder`], runs all-MiniLM-L6-v2 (384
//! dimensions) locally through ONNX Runtime with mean pooling and L2
//! normalization. Model files are fetched from the HuggingFace Hub on first use
//! and cached under the configured model cache directory.

use std::path::Path;
use std::sync::Mutex;

use hf_hub::api::sync::ApiBuilder;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};

use crate::errors::EmbeddingError;

/// Embedding dimensions shared by the model and the vector table.
pub const EMBEDDING_DIMS: usize = 384;

/// Default sentence-transformer used for memories and queries.
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Computes a fixed-length vector for a piece of text.
///
/// Implementations must be deterministic for a given model and must return
/// exactly [`EMBEDDING_DIMS`] finite values. Calls are blocking; async callers
/// run them on the blocking pool.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// ONNX embedding engine for synchronous text-to-vector conversion.
pub struct EmbeddingEngine {
    session: Session,
    tokenizer: Tokenizer,
    requires_token_type_ids: bool,
}

impl EmbeddingEngine {
    /// Load model from the cache or download it on first use.
    ///
    /// Uses the blocking `hf_hub` client (ureq), so this must not be called from
    /// inside an async task without `spawn_blocking`.
    pub fn new(model_id: &str, cache_dir: &Path) -> Result<Self, EmbeddingError> {
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .build()?;
        let repo = api.model(model_id.to_string());

        let model_path = repo
            .get("onnx/model.onnx")
            .or_else(|_| repo.get("model.onnx"))?;
        let tokenizer_path = repo.get("tokenizer.json")?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: 256,
                ..Default::default()
            }))?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)
            .map_err(ort::Error::from)?
            .commit_from_file(&model_path)?;

        // BERT exports differ on whether token_type_ids is a graph input
        let requires_token_type_ids = session
            .inputs()
            .iter()
            .any(|input| input.name() == "token_type_ids");

        tracing::info!(model = model_id, "embedding model loaded");

        Ok(EmbeddingEngine {
            session,
            tokenizer,
            requires_token_type_ids,
        })
    }

    /// Generate an L2-normalized 384-dimensional embedding for one text.
    ///
    /// Empty strings return a zero vector. Texts beyond the tokenizer's window
    /// are truncated.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Ok(vec![0.0f32; EMBEDDING_DIMS]);
        }

        let encoding = self.tokenizer.encode(text, true)?;
        let input_ids = encoding.get_ids();
        let attention_mask = encoding.get_attention_mask();

        if input_ids.is_empty() {
            return Ok(vec![0.0f32; EMBEDDING_DIMS]);
        }

        let seq_len = input_ids.len();

        let input_ids_vec: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let attention_mask_vec: Vec<i64> = attention_mask.iter().map(|&m| m as i64).collect();

        let input_ids_tensor = Tensor::from_array(([1usize, seq_len], input_ids_vec))?;
        let attention_mask_tensor = Tensor::from_array(([1usize, seq_len], attention_mask_vec))?;

        let outputs = if self.requires_token_type_ids {
            let token_type_ids_tensor =
                Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len]))?;
            self.session.run(inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            ])?
        } else {
            self.session.run(inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])?
        };

        let (shape, data) = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .ok_or_else(|| {
                EmbeddingError::Inference(
                    "Output tensor 'last_hidden_state' or 'token_embeddings' not found".to_string(),
                )
            })?
            .try_extract_tensor::<f32>()?;

        if shape.len() != 3 {
            return Err(EmbeddingError::Inference(format!(
                "Expected 3D output (batch, seq_len, hidden), got {:?}",
                shape
            )));
        }

        let batch_size = shape[0] as usize;
        let hidden_dim = shape[2] as usize;
        if batch_size != 1 || hidden_dim != EMBEDDING_DIMS {
            return Err(EmbeddingError::Inference(format!(
                "Unexpected output shape: {:?}, batch=1, hidden=384 expected",
                shape
            )));
        }

        Ok(mean_pool(data, attention_mask, hidden_dim, seq_len))
    }
}

/// Mask-weighted mean over token vectors, then L2 normalization.
fn mean_pool(data: &[f32], attention_mask: &[u32], hidden_dim: usize, seq_len: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];

    for (token_idx, chunk) in data.chunks(hidden_dim).take(seq_len).enumerate() {
        let mask_value = attention_mask.get(token_idx).copied().unwrap_or(0) as f32;
        for (dim, pooled_value) in pooled.iter_mut().enumerate() {
            *pooled_value += chunk[dim] * mask_value;
        }
    }

    let mask_sum: f32 = attention_mask
        .iter()
        .take(seq_len)
        .map(|&m| m as f32)
        .sum::<f32>()
        .max(1e-9);

    for value in pooled.iter_mut() {
        *value /= mask_sum;
    }

    l2_normalize(&pooled)
}

fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|&x| x * x).sum::<f32>().sqrt();
    let norm = norm.max(1e-9);

    vec.iter().map(|&x| x / norm).collect()
}

/// Thread-safe [`Embedder`] over a single [`EmbeddingEngine`].
///
/// ONNX sessions need exclusive access to run, so concurrent callers queue on
/// the inner mutex.
pub struct OnnxEmbedder {
    engine: Mutex<EmbeddingEngine>,
}

impl OnnxEmbedder {
    pub fn load(model_id: &str, cache_dir: &Path) -> Result<Self, EmbeddingError> {
        Ok(Self {
            engine: Mutex::new(EmbeddingEngine::new(model_id, cache_dir)?),
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| EmbeddingError::Worker("embedding engine lock poisoned".to_string()))?;
        engine.embed(text)
    }
}
