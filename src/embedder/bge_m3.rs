/// BGE-M3 embedder wrapper.
///
/// Validates inputs, warns about texts likely to exceed the model's token
/// limit, and delegates the actual encoding to a [`DenseEncoder`]. The
/// default encoder is [`OnnxEncoder`]; tests inject [`HashEncoder`].
///
/// [`HashEncoder`]: super::mock::HashEncoder
use std::fmt;

use tracing::{info, warn};

use super::onnx::OnnxEncoder;
use super::{DenseEncoder, Embedder, EmbedderError};
use crate::config::EmbedderConfig;

/// Output dimension of BGE-M3 dense vectors.
pub const EMBEDDING_DIM: usize = 1024;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Rough characters-to-tokens ratio (1 token ≈ 1.5 CJK characters).
///
/// Only used to decide whether to warn about truncation; the tokenizer
/// has the final say.
pub const CHAR_TO_TOKEN_RATIO: f64 = 0.67;

/// Embedder producing 1024-dimensional BGE-M3 dense vectors.
pub struct BgeM3Embedder<E: DenseEncoder = OnnxEncoder> {
    config: EmbedderConfig,
    encoder: E,
}

impl BgeM3Embedder<OnnxEncoder> {
    /// Load the ONNX model described by `config`.
    ///
    /// Downloads missing model files when `auto_download` is set. Any
    /// failure here is fatal for this embedder and is not retried.
    pub fn load(config: EmbedderConfig) -> Result<Self, EmbedderError> {
        config
            .validate()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("invalid config: {e:#}")))?;

        info!(
            model = %config.model,
            fp16 = config.model_kwargs.use_fp16,
            device = %config.model_kwargs.device,
            "Loading embedding model"
        );

        let encoder = OnnxEncoder::load(&config).inspect_err(|e| {
            tracing::error!("Failed to load {}: {e}", config.model);
        })?;

        info!(
            device = %encoder.device(),
            fp16 = encoder.use_fp16(),
            dir = %encoder.model_dir().display(),
            "{} loaded successfully",
            config.model
        );
        Ok(Self { config, encoder })
    }
}

impl<E: DenseEncoder> BgeM3Embedder<E> {
    /// Wrap an already constructed encoder.
    pub fn with_encoder(config: EmbedderConfig, encoder: E) -> Result<Self, EmbedderError> {
        config
            .validate()
            .map_err(|e| EmbedderError::InvalidInput(format!("invalid config: {e:#}")))?;
        Ok(Self { config, encoder })
    }

    #[must_use]
    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    #[must_use]
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    fn max_length(&self) -> usize {
        self.config.model_kwargs.max_length
    }

    /// Estimated token count of `text` under [`CHAR_TO_TOKEN_RATIO`].
    fn estimated_tokens(text: &str) -> f64 {
        text.chars().count() as f64 * CHAR_TO_TOKEN_RATIO
    }

    fn exceeds_max_length(&self, text: &str) -> bool {
        Self::estimated_tokens(text) > self.max_length() as f64
    }

    /// Encode `texts` and check the result is `(texts.len(), EMBEDDING_DIM)`.
    fn encode_checked(
        &self,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let output = self.encoder.encode(texts, batch_size, self.max_length())?;

        let (rows, cols) = output.dense_vecs.shape;
        if rows != texts.len() {
            return Err(EmbedderError::OutputCountMismatch {
                expected: texts.len(),
                actual: rows,
            });
        }
        if cols != EMBEDDING_DIM {
            return Err(EmbedderError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: cols,
            });
        }

        output.dense_vecs.into_rows()
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

impl<E: DenseEncoder> Embedder for BgeM3Embedder<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if is_blank(text) {
            return Err(EmbedderError::EmptyText);
        }

        if self.exceeds_max_length(text) {
            warn!(
                "Text length ({} chars) may exceed {} tokens, it will be truncated automatically",
                text.chars().count(),
                self.max_length()
            );
        }

        self.encode_checked(&[text], 1)?
            .into_iter()
            .next()
            .ok_or(EmbedderError::OutputCountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    fn batch_embed_with_size(
        &self,
        texts: &[&str],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if batch_size == 0 {
            return Err(EmbedderError::InvalidInput(
                "batch_size must be positive".to_string(),
            ));
        }

        if let Some(idx) = texts.iter().position(|t| is_blank(t)) {
            return Err(EmbedderError::EmptyTextAt { position: idx + 1 });
        }

        for (idx, text) in texts.iter().enumerate() {
            if self.exceeds_max_length(text) {
                warn!(
                    "Text #{} length ({} chars) may exceed {} tokens, it will be truncated automatically",
                    idx + 1,
                    text.chars().count(),
                    self.max_length()
                );
            }
        }

        self.encode_checked(texts, batch_size)
    }

    fn batch_embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.batch_embed_with_size(texts, self.config.batch_size)
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

impl<E: DenseEncoder> fmt::Display for BgeM3Embedder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BgeM3Embedder(model={}, dims={}, fp16={}, device={}, max_length={})",
            self.config.model,
            EMBEDDING_DIM,
            self.config.model_kwargs.use_fp16,
            self.config.model_kwargs.device,
            self.max_length()
        )
    }
}
