//! Text embedders used to vectorise tool descriptions and queries.
//!
//! Every embedder produces vectors of one fixed dimension for its lifetime.
//! Empty text maps to the zero vector of that dimension rather than an error.

pub mod bi_encoder;
pub mod hashing;

pub use bi_encoder::BiEncoderEmbedder;
pub use hashing::HashingEmbedder;

use crate::error::Result;

/// Maps text to a fixed-dimension vector.
///
/// Implementations are pure and deterministic for a fixed model version and
/// may be CPU-bound; async callers run them on the blocking pool.
pub trait Embedder: Send + Sync {
    /// Output dimension `D`.
    fn dimension(&self) -> usize;

    /// Identifies the model (and version) producing the vectors.
    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}
