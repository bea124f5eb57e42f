/// XLM-RoBERTa tokenizer wrapper around HuggingFace `tokenizers` crate.
///
/// Produces padded, truncated batches of input IDs and attention masks for
/// the ONNX encoder.
use std::path::Path;

use anyhow::Result;
use tokenizers::Tokenizer;

/// Pad token id of the XLM-RoBERTa vocabulary, used if `<pad>` is missing.
const FALLBACK_PAD_ID: u32 = 1;

/// Wrapper around the HuggingFace tokenizer for BGE-M3.
pub struct M3Tokenizer {
    inner: Tokenizer,
    pad_id: i64,
    eos_id: Option<i64>,
}

/// A tokenized batch, padded to its longest sequence.
#[derive(Debug, Clone)]
pub struct TokenizedBatch {
    /// Row-major token IDs, `batch_size * seq_len` entries.
    pub input_ids: Vec<i64>,
    /// Attention mask (1 for real tokens, 0 for padding).
    pub attention_mask: Vec<i64>,
    pub batch_size: usize,
    pub seq_len: usize,
}

impl M3Tokenizer {
    /// Load a tokenizer from a `tokenizer.json` file in the model directory.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {}",
            model_dir.display()
        );

        let mut inner = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        // Truncation and padding are applied per batch in `tokenize_batch`
        let _ = inner.with_truncation(None);
        inner.with_padding(None);

        Ok(Self::from_tokenizer(inner))
    }

    /// Wrap an already built tokenizer.
    #[must_use]
    pub fn from_tokenizer(inner: Tokenizer) -> Self {
        let pad_id = inner.token_to_id("<pad>").unwrap_or(FALLBACK_PAD_ID);
        let eos_id = inner.token_to_id("</s>");
        Self {
            inner,
            pad_id: i64::from(pad_id),
            eos_id: eos_id.map(i64::from),
        }
    }

    /// Tokenize `texts`, truncating each to `max_length` tokens and padding
    /// to the longest sequence in the batch.
    ///
    /// A truncated sequence keeps the closing `</s>` token in its last slot.
    pub fn tokenize_batch(&self, texts: &[&str], max_length: usize) -> Result<TokenizedBatch> {
        anyhow::ensure!(max_length > 0, "max_length must be positive");

        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("failed to encode batch: {e}"))?;

        let mut rows: Vec<Vec<i64>> = encodings
            .iter()
            .map(|enc| enc.get_ids().iter().map(|&id| i64::from(id)).collect())
            .collect();

        for ids in &mut rows {
            if ids.len() > max_length {
                ids.truncate(max_length);
                if let (Some(eos), Some(last)) = (self.eos_id, ids.last_mut()) {
                    *last = eos;
                }
            }
        }

        let seq_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut input_ids = Vec::with_capacity(rows.len() * seq_len);
        let mut attention_mask = Vec::with_capacity(rows.len() * seq_len);

        for ids in &rows {
            let real = ids.len();
            input_ids.extend_from_slice(ids);
            input_ids.extend(std::iter::repeat_n(self.pad_id, seq_len - real));
            attention_mask.extend(std::iter::repeat_n(1i64, real));
            attention_mask.extend(std::iter::repeat_n(0i64, seq_len - real));
        }

        Ok(TokenizedBatch {
            input_ids,
            attention_mask,
            batch_size: rows.len(),
            seq_len,
        })
    }

    /// Get the vocabulary size.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Tiny word-level `tokenizer.json` with XLM-R style special tokens.
    const TOY_TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                {"SpecialToken": {"id": "<s>", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "</s>", "type_id": 0}}
            ],
            "pair": [
                {"SpecialToken": {"id": "<s>", "type_id": 0}},
                {"Sequence": {"id": "A", "type_id": 0}},
                {"SpecialToken": {"id": "</s>", "type_id": 0}},
                {"Sequence": {"id": "B", "type_id": 0}},
                {"SpecialToken": {"id": "</s>", "type_id": 0}}
            ],
            "special_tokens": {
                "<s>": {"id": "<s>", "ids": [0], "tokens": ["<s>"]},
                "</s>": {"id": "</s>", "ids": [2], "tokens": ["</s>"]}
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3,
                "hello": 4, "world": 5, "foo": 6, "bar": 7
            },
            "unk_token": "<unk>"
        }
    }"#;

    fn toy_tokenizer() -> M3Tokenizer {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), TOY_TOKENIZER_JSON).unwrap();
        M3Tokenizer::from_model_dir(dir.path()).unwrap()
    }

    #[test]
    fn test_batch_padding() {
        let tokenizer = toy_tokenizer();
        let batch = tokenizer
            .tokenize_batch(&["hello", "hello world foo"], 512)
            .unwrap();

        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.seq_len, 5);
        assert_eq!(&batch.input_ids[..5], &[0, 4, 2, 1, 1]);
        assert_eq!(&batch.attention_mask[..5], &[1, 1, 1, 0, 0]);
        assert_eq!(&batch.input_ids[5..], &[0, 4, 5, 6, 2]);
        assert_eq!(&batch.attention_mask[5..], &[1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_truncation_keeps_eos() {
        let tokenizer = toy_tokenizer();
        let batch = tokenizer
            .tokenize_batch(&["hello world foo bar"], 4)
            .unwrap();

        assert_eq!(batch.seq_len, 4);
        assert_eq!(batch.input_ids, vec![0, 4, 5, 2]);
        assert_eq!(batch.attention_mask, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_zero_max_length_rejected() {
        let tokenizer = toy_tokenizer();
        assert!(tokenizer.tokenize_batch(&["hello"], 0).is_err());
    }

    #[test]
    fn test_tokenizer_missing_file() {
        let result = M3Tokenizer::from_model_dir(Path::new("/nonexistent/path"));
        assert!(result.is_err());
    }

    /// This test requires the actual tokenizer.json file.
    /// Run with: cargo test tokenizer -- --ignored
    #[test]
    #[ignore]
    fn test_tokenize_with_real_model() {
        let model_dir = crate::config::EmbedderConfig::default().resolved_model_dir();
        if !model_dir.join("tokenizer.json").exists() {
            eprintln!("Skipping: model files not downloaded");
            return;
        }

        let tokenizer = M3Tokenizer::from_model_dir(&model_dir).unwrap();
        assert!(tokenizer.vocab_size() > 200_000);

        let batch = tokenizer
            .tokenize_batch(&["人工智慧正在改變世界", "Hello, world!"], 8192)
            .unwrap();
        assert_eq!(batch.batch_size, 2);
        assert_eq!(batch.input_ids.len(), 2 * batch.seq_len);
        // Should have <s> and </s> tokens
        assert!(batch.seq_len >= 3);
    }
}
