/// Embedder traits and shared types for text embedding.
///
/// [`Embedder`] is the interface memory stores call; [`DenseEncoder`] is the
/// model capability an embedder delegates to.
pub mod bge_m3;
pub mod download;
pub mod mock;
pub mod onnx;
pub mod tokenizer;

use thiserror::Error;

pub use bge_m3::{BgeM3Embedder, CHAR_TO_TOKEN_RATIO, DEFAULT_BATCH_SIZE, EMBEDDING_DIM};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("cannot embed empty text")]
    EmptyText,

    #[error("text #{position} is empty: cannot embed empty text")]
    EmptyTextAt { position: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model returned {actual} vectors for {expected} texts")]
    OutputCountMismatch { expected: usize, actual: usize },
}

impl EmbedderError {
    /// Whether the caller can fix this error by changing the input.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::EmptyText | Self::EmptyTextAt { .. } | Self::InvalidInput(_)
        )
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple texts, processing `batch_size` texts per model pass.
    ///
    /// Vectors come back in input order, one per text.
    fn batch_embed_with_size(
        &self,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Embed multiple texts with the embedder's default batch size.
    fn batch_embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.batch_embed_with_size(texts, DEFAULT_BATCH_SIZE)
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Row-major dense matrix returned by an encoder: `shape.0` vectors of
/// `shape.1` components each.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVecs {
    pub shape: (usize, usize),
    pub data: Vec<f32>,
}

impl DenseVecs {
    /// Build from per-text rows. All rows must share one length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, EmbedderError> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(EmbedderError::DimensionMismatch {
                expected: cols,
                actual: bad.len(),
            });
        }
        let shape = (rows.len(), cols);
        Ok(Self {
            shape,
            data: rows.into_iter().flatten().collect(),
        })
    }

    /// Split into one `Vec<f32>` per row.
    pub fn into_rows(self) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let (rows, cols) = self.shape;
        if self.data.len() != rows * cols {
            return Err(EmbedderError::InferenceFailed(format!(
                "dense output has {} values, shape ({rows}, {cols}) needs {}",
                self.data.len(),
                rows * cols
            )));
        }
        if cols == 0 {
            return Ok(vec![Vec::new(); rows]);
        }
        Ok(self.data.chunks_exact(cols).map(<[f32]>::to_vec).collect())
    }
}

/// Output of a single encode call.
///
/// Only the dense representation is carried; sparse lexical weights and
/// multi-vector outputs are not part of the embedder contract.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutput {
    pub dense_vecs: DenseVecs,
}

/// A model that turns a batch of texts into dense vectors.
///
/// Implementations handle their own tokenization, truncation to
/// `max_length` tokens and internal batching by `batch_size`. Rows of the
/// returned matrix must follow input order.
pub trait DenseEncoder: Send + Sync {
    fn encode(
        &self,
        texts: &[&str],
        batch_size: usize,
        max_length: usize,
    ) -> Result<EncodeOutput, EmbedderError>;
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when lengths differ or either vector is all zeros.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_dense_vecs_rows() {
        let dense = DenseVecs::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(dense.shape, (2, 2));
        assert_eq!(dense.into_rows().unwrap(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_dense_vecs_ragged_rows() {
        let err = DenseVecs::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::DimensionMismatch { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_dense_vecs_bad_buffer() {
        let dense = DenseVecs {
            shape: (2, 3),
            data: vec![0.0; 5],
        };
        assert!(matches!(
            dense.into_rows(),
            Err(EmbedderError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_error_classes() {
        assert!(EmbedderError::EmptyText.is_invalid_input());
        assert!(EmbedderError::EmptyTextAt { position: 2 }.is_invalid_input());
        assert!(!EmbedderError::InferenceFailed("x".into()).is_invalid_input());
        assert!(!EmbedderError::ModelLoadFailed("x".into()).is_invalid_input());
    }

    #[test]
    fn test_error_messages() {
        assert!(EmbedderError::EmptyText.to_string().contains("empty text"));
        let msg = EmbedderError::EmptyTextAt { position: 2 }.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains("empty text"));
    }
}
