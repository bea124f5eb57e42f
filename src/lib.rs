//! # bgem3: BGE-M3 dense embedder
//!
//! Exposes the multilingual BGE-M3 model (1024-dimensional dense vectors)
//! through a uniform embedder interface for memory stores.
//!
//! ## Architecture
//!
//! - **[`config`]**: Embedder configuration (`model`, `model_kwargs.*`), loading and validation
//! - **[`embedder`]**: `Embedder` / `DenseEncoder` traits, the BGE-M3 wrapper,
//!   the ONNX Runtime encoder, tokenizer, model download and a stub encoder
//!
//! ## Example
//!
//! ```ignore
//! use bgem3::config::EmbedderConfig;
//! use bgem3::embedder::{BgeM3Embedder, Embedder};
//!
//! let embedder = BgeM3Embedder::load(EmbedderConfig::default())?;
//! let vector = embedder.embed("人工智慧正在改變世界")?;
//! assert_eq!(vector.len(), 1024);
//! ```

pub mod config;
pub mod embedder;
