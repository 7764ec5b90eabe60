//! Bi-encoder embedder backed by an ONNX sentence-embedding model.
//!
//! Encodes text independently of any query (mean pooling over token states,
//! then L2 normalisation), so tool vectors can be computed once at insert time.

use super::{l2_normalize, Embedder};
use crate::error::{AppError, Result};
use crossbeam::queue::ArrayQueue;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::cell::UnsafeCell;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

/// Sentence-embedding model run on a pool of ONNX sessions.
///
/// # Session pool
/// `Session::run` needs exclusive access. Rather than serialising every call
/// behind a Mutex, the embedder owns N sessions and hands out indices through a
/// lock-free queue; an index is held by at most one caller between
/// `acquire_session` and `release_session`.
pub struct BiEncoderEmbedder {
    sessions: Vec<UnsafeCell<Session>>,
    available: Arc<ArrayQueue<usize>>,
    tokenizer: Tokenizer,
    max_length: usize,
    embedding_dim: usize,
    model_id: String,
}

impl BiEncoderEmbedder {
    /// Load the model and tokenizer.
    ///
    /// # Arguments
    /// * `model_path` - ONNX model exporting `last_hidden_state`
    /// * `tokenizer_path` - tokenizer JSON file
    /// * `max_length` - truncation length in tokens
    /// * `embedding_dim` - expected hidden size; checked on every inference
    /// * `pool_size` - number of sessions
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        embedding_dim: usize,
        pool_size: usize,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::EmbeddingFailure(format!("Failed to load bi-encoder tokenizer: {}", e))
        })?;

        let model_bytes = std::fs::read(model_path).map_err(|e| {
            AppError::EmbeddingFailure(format!("Failed to read bi-encoder model: {}", e))
        })?;

        let pool_size = pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        let available = Arc::new(ArrayQueue::new(pool_size));

        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?
                .commit_from_memory(&model_bytes)
                .map_err(|e: ort::Error| AppError::EmbeddingFailure(e.to_string()))?;

            sessions.push(UnsafeCell::new(session));
            available.push(i).map_err(|_| {
                AppError::EmbeddingFailure("Failed to initialize session pool".into())
            })?;
        }

        let model_id = format!(
            "onnx:{}:{}",
            model_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            embedding_dim
        );

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            max_length,
            embedding_dim,
            pool_size,
            "Bi-encoder model loaded"
        );

        Ok(Self {
            sessions,
            available,
            tokenizer,
            max_length,
            embedding_dim,
            model_id,
        })
    }

    fn acquire_session(&self) -> Result<usize> {
        self.available
            .pop()
            .ok_or_else(|| AppError::ResourceError("No available embedding sessions".into()))
    }

    fn release_session(&self, index: usize) {
        let _ = self.available.push(index);
    }

    fn encode_with_session(&self, session_idx: usize, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::EmbeddingFailure(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let shape = [batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?;

        // SAFETY: the ArrayQueue hands each index to one caller at a time, so this
        // is the only live reference to the session until release_session.
        let session = unsafe { &mut *self.sessions[session_idx].get() };

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| AppError::EmbeddingFailure(format!("Bi-encoder inference failed: {}", e)))?;

        let hidden_state = outputs.get("last_hidden_state").ok_or_else(|| {
            AppError::EmbeddingFailure("No 'last_hidden_state' output found".to_string())
        })?;

        let (shape_info, data) = hidden_state
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::EmbeddingFailure(e.to_string()))?;
        let hidden_size = shape_info[2] as usize;

        if hidden_size != self.embedding_dim {
            return Err(AppError::EmbeddingFailure(format!(
                "Model hidden size {} does not match configured dimension {}",
                hidden_size, self.embedding_dim
            )));
        }

        // Mean pooling over non-padding tokens
        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;

            for j in 0..max_len {
                if attention_mask[i * max_len + j] == 1 {
                    let base_idx = i * max_len * hidden_size + j * hidden_size;
                    for (k, sum_val) in sum.iter_mut().enumerate() {
                        *sum_val += data[base_idx + k];
                    }
                    count += 1.0;
                }
            }

            if count > 0.0 {
                for val in sum.iter_mut() {
                    *val /= count;
                }
            }

            l2_normalize(&mut sum);
            embeddings.push(sum);
        }

        Ok(embeddings)
    }
}

impl Embedder for BiEncoderEmbedder {
    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let mut embeddings = self.embed_batch(&texts)?;
        embeddings
            .pop()
            .ok_or_else(|| AppError::EmbeddingFailure("Empty embedding batch".to_string()))
    }

    /// Blank texts bypass the model and map to the zero vector.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = vec![vec![0.0f32; self.embedding_dim]; texts.len()];

        let (positions, non_empty): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.clone()))
            .unzip();

        if non_empty.is_empty() {
            return Ok(results);
        }

        let session_idx = self.acquire_session()?;
        let encoded = self.encode_with_session(session_idx, &non_empty);
        self.release_session(session_idx);

        for (pos, embedding) in positions.into_iter().zip(encoded?) {
            results[pos] = embedding;
        }

        Ok(results)
    }
}

// SAFETY: sessions are only reached through an index popped from the ArrayQueue,
// which gives the same mutual exclusion as a Mutex per session. The tokenizer is
// used through shared references only.
unsafe impl Send for BiEncoderEmbedder {}
unsafe impl Sync for BiEncoderEmbedder {}
