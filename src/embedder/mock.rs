/// Stub dense encoder for testing purposes.
///
/// Generates deterministic embeddings based on text hash, so the
/// embedder contract can be exercised without loading model weights.
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{DenseEncoder, DenseVecs, EmbedderError, EncodeOutput};

/// A stub encoder that produces deterministic vectors from text hashes.
///
/// Records how often it was called and with which parameters.
pub struct HashEncoder {
    pub dimensions: usize,
    calls: AtomicUsize,
    last_params: Mutex<Option<(usize, usize)>>,
}

impl HashEncoder {
    /// Create a new `HashEncoder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    /// Number of `encode` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `batch_size` passed to the most recent `encode` call.
    #[must_use]
    pub fn last_batch_size(&self) -> Option<usize> {
        self.last_params().map(|(batch_size, _)| batch_size)
    }

    /// `max_length` passed to the most recent `encode` call.
    #[must_use]
    pub fn last_max_length(&self) -> Option<usize> {
        self.last_params().map(|(_, max_length)| max_length)
    }

    fn last_params(&self) -> Option<(usize, usize)> {
        self.last_params.lock().ok().and_then(|p| *p)
    }

    /// Deterministic unit vector for `text`.
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut embedding = Vec::with_capacity(self.dimensions);
        let mut block = 0u64;
        while embedding.len() < self.dimensions {
            // Each 8-dim block gets its own hash so vectors don't repeat
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            block.hash(&mut hasher);
            for b in hasher.finish().to_le_bytes() {
                if embedding.len() == self.dimensions {
                    break;
                }
                embedding.push(f32::from(b) / 127.5 - 1.0);
            }
            block += 1;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        embedding
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(super::EMBEDDING_DIM)
    }
}

impl DenseEncoder for HashEncoder {
    fn encode(
        &self,
        texts: &[&str],
        batch_size: usize,
        max_length: usize,
    ) -> Result<EncodeOutput, EmbedderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_params.lock() {
            *last = Some((batch_size, max_length));
        }

        let rows = texts.iter().map(|t| self.vector_for(t)).collect();
        Ok(EncodeOutput {
            dense_vecs: DenseVecs::from_rows(rows)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(encoder: &HashEncoder, texts: &[&str]) -> Vec<Vec<f32>> {
        encoder
            .encode(texts, 8, 512)
            .unwrap()
            .dense_vecs
            .into_rows()
            .unwrap()
    }

    #[test]
    fn test_hash_encoder_shape() {
        let encoder = HashEncoder::new(1024);
        let out = encoder.encode(&["a", "b", "c"], 2, 512).unwrap();
        assert_eq!(out.dense_vecs.shape, (3, 1024));
    }

    #[test]
    fn test_hash_encoder_deterministic() {
        let encoder = HashEncoder::new(384);
        let a = rows(&encoder, &["hello"]);
        let b = rows(&encoder, &["hello"]);
        assert_eq!(a, b, "same input should produce same output");
    }

    #[test]
    fn test_hash_encoder_different_inputs() {
        let encoder = HashEncoder::new(384);
        let out = rows(&encoder, &["hello", "world"]);
        assert_ne!(out[0], out[1], "different inputs should produce different outputs");
    }

    #[test]
    fn test_hash_encoder_normalized_and_bounded() {
        let encoder = HashEncoder::new(1024);
        let vec = &rows(&encoder, &["test normalization"])[0];
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
        assert!(vec.iter().all(|v| v.is_finite() && (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_hash_encoder_records_calls() {
        let encoder = HashEncoder::default();
        assert_eq!(encoder.calls(), 0);
        assert_eq!(encoder.last_batch_size(), None);

        encoder.encode(&["a"], 4, 100).unwrap();
        assert_eq!(encoder.calls(), 1);
        assert_eq!(encoder.last_batch_size(), Some(4));
        assert_eq!(encoder.last_max_length(), Some(100));
    }
}
