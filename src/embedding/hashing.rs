//! Feature-hashing embedder.
//!
//! Each token is hashed with SHA-256 into one of `D` buckets with a pseudo-random
//! sign, and the bag of tokens is L2-normalised. Texts sharing content words land
//! close together, which is enough to route queries across a tool catalog
//! without loading a neural model.

use super::{l2_normalize, Embedder};
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};

/// Words that carry no routing signal in tool descriptions or queries.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "get",
    "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "please", "s", "that", "the",
    "this", "to", "use", "what", "when", "where", "which", "with", "you", "your",
];

pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(AppError::ValidationError(
                "Embedding dimension must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            dimension,
            model_id: format!("hashing-sha256-v1-{}", dimension),
        })
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
            .map(|t| t.to_lowercase())
            .filter(|t| !STOP_WORDS.contains(&t.as_str()))
    }

    /// Bucket index and sign for a token.
    fn feature(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in Self::tokens(text) {
            let (bucket, sign) = self.feature(&token);
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}
