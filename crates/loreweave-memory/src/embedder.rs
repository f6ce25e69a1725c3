//! The embedding seam.
//!
//! [`Embedder`] maps text to a fixed-dimension vector.  The production
//! implementation talks to a model server (see `loreweave-runtime`);
//! [`HashingEmbedder`] is a deterministic bag-of-words embedder that needs
//! no network and keeps lexical overlap monotonic with similarity.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while computing an embedding.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The embedding service could not be reached or answered with an error.
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
    /// The service answered but the payload could not be used.
    #[error("unexpected embedding response: {0}")]
    BadResponse(String),
}

/// Maps text into the vector space used for story recall.
///
/// Implementations must be deterministic enough that the same text embeds
/// close to itself, and must always return vectors of the same dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Default vector width for [`HashingEmbedder`].
pub const DEFAULT_HASHING_DIMENSION: usize = 256;

/// Offline embedder: lower-cased word tokens hashed (FNV-1a) into buckets,
/// then L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// `dimension` is clamped to at least 1.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimension as u64) as usize
    }

    /// Synchronous core of [`Embedder::embed`].
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let idx = self.bucket(&token.to_lowercase());
            vector[idx] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}
