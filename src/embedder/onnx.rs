/// ONNX Runtime dense encoder using the `ort` crate.
///
/// Loads the BGE-M3 ONNX export, runs inference batch by batch, takes the
/// CLS hidden state as the dense vector, and L2-normalizes the result.
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::Tensor;
use tracing::{debug, info, warn};

use super::download::{all_files_present, download_model_files};
use super::tokenizer::M3Tokenizer;
use super::{DenseEncoder, DenseVecs, EmbedderError, EncodeOutput};
use crate::config::EmbedderConfig;

/// Full-precision ONNX graph.
pub const FP32_MODEL_FILE: &str = "model.onnx";

/// Optional half-precision graph, picked up on CUDA when `use_fp16` is set.
/// It must keep fp32 inputs and outputs (`keep_io_types` export).
pub const FP16_MODEL_FILE: &str = "model_fp16.onnx";

/// Compute devices the ONNX encoder can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CUDA execution provider on the given GPU ordinal.
    Cuda(i32),
}

impl Device {
    /// Parse a device string: `"cpu"`, `"cuda"` or `"cuda:N"`.
    pub fn parse(device: &str) -> Result<Self, EmbedderError> {
        let normalized = device.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse::<i32>().ok())
                .filter(|id| *id >= 0)
                .map(Self::Cuda)
                .ok_or_else(|| {
                    EmbedderError::ModelLoadFailed(format!(
                        "device {other:?} is not supported by the ONNX encoder (use \"cpu\", \"cuda\" or \"cuda:N\")"
                    ))
                }),
        }
    }

    /// Fail unless this build can run on the device.
    pub fn ensure_available(self) -> Result<(), EmbedderError> {
        match self {
            Self::Cpu => Ok(()),
            Self::Cuda(_) if cfg!(feature = "cuda") => Ok(()),
            Self::Cuda(_) => Err(EmbedderError::ModelLoadFailed(format!(
                "device {self} requires building with the `cuda` feature"
            ))),
        }
    }

    /// Whether half precision applies on this device.
    ///
    /// Half precision only pays off on the GPU; on CPU the fp32 graph runs.
    #[must_use]
    pub fn resolve_fp16(self, requested: bool) -> bool {
        requested && matches!(self, Self::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Pick the graph to load: the fp16 export when requested and present,
/// otherwise the fp32 one.
fn select_model_file(model_dir: &Path, use_fp16: bool) -> (PathBuf, bool) {
    let fp16_path = model_dir.join(FP16_MODEL_FILE);
    if use_fp16 {
        if fp16_path.exists() {
            return (fp16_path, true);
        }
        warn!(
            "fp16 requested but {FP16_MODEL_FILE} not found in {}, running in fp32",
            model_dir.display()
        );
    }
    (model_dir.join(FP32_MODEL_FILE), false)
}

#[cfg(feature = "cuda")]
fn register_device(
    builder: SessionBuilder,
    device: Device,
) -> Result<SessionBuilder, EmbedderError> {
    use ort::execution_providers::CUDAExecutionProvider;

    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda(id) => builder
            .with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure()])
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("CUDA provider error: {e}"))),
    }
}

#[cfg(not(feature = "cuda"))]
fn register_device(
    builder: SessionBuilder,
    device: Device,
) -> Result<SessionBuilder, EmbedderError> {
    device.ensure_available()?;
    Ok(builder)
}

/// ONNX-backed encoder implementing the `DenseEncoder` trait.
pub struct OnnxEncoder {
    session: Mutex<Session>,
    tokenizer: M3Tokenizer,
    device: Device,
    use_fp16: bool,
    model_dir: PathBuf,
}

impl OnnxEncoder {
    /// Load the encoder described by `config`, downloading missing files
    /// first when `auto_download` is enabled.
    pub fn load(config: &EmbedderConfig) -> Result<Self, EmbedderError> {
        let device = Device::parse(&config.model_kwargs.device)?;
        device.ensure_available()?;
        let model_dir = config.resolved_model_dir();

        if config.auto_download && !all_files_present(&model_dir) {
            download_model_files(&config.model, &model_dir)
                .map_err(|e| EmbedderError::ModelLoadFailed(format!("download failed: {e:#}")))?;
        }

        let use_fp16 = device.resolve_fp16(config.model_kwargs.use_fp16);
        if config.model_kwargs.use_fp16 && !use_fp16 {
            info!("fp16 is ignored on {device}, running in fp32");
        }

        Self::from_model_dir(&model_dir, device, use_fp16, config.intra_threads)
    }

    /// Create a new `OnnxEncoder` by loading a model from the given directory.
    ///
    /// Expects `model.onnx` (plus `model.onnx_data` when the export uses
    /// external weights) and `tokenizer.json` in `model_dir`. With
    /// `use_fp16`, `model_fp16.onnx` is preferred when present.
    pub fn from_model_dir(
        model_dir: &Path,
        device: Device,
        use_fp16: bool,
        intra_threads: usize,
    ) -> Result<Self, EmbedderError> {
        let (model_path, use_fp16) = select_model_file(model_dir, use_fp16);

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "{FP32_MODEL_FILE} not found in {}",
                model_dir.display()
            )));
        }
        device.ensure_available()?;

        let tokenizer = M3Tokenizer::from_model_dir(model_dir)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("tokenizer error: {e}")))?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());
        info!("Initializing ONNX Runtime on {device}...");

        let builder = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?;
        let session = register_device(builder, device)?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        debug!(path = %model_path.display(), fp16 = use_fp16, "ONNX graph committed");
        info!("ONNX model loaded from {}", model_dir.display());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            device,
            use_fp16,
            model_dir: model_dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether the half-precision graph is loaded.
    #[must_use]
    pub fn use_fp16(&self) -> bool {
        self.use_fp16
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Run one model pass over `texts`, returning one normalized vector each.
    fn encode_chunk(
        &self,
        texts: &[&str],
        max_length: usize,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let batch = self
            .tokenizer
            .tokenize_batch(texts, max_length)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;

        let shape = [batch.batch_size, batch.seq_len];

        // Create input tensors using (shape, data) tuple form
        // This avoids ndarray version coupling with ort
        let input_ids_val = Tensor::from_array((shape, batch.input_ids))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array((shape, batch.attention_mask)).map_err(
            |e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")),
        )?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        let pooled = cls_pooling(data, &dims, batch.batch_size)?;

        Ok(pooled.iter().map(|v| l2_normalize(v)).collect())
    }
}

impl DenseEncoder for OnnxEncoder {
    fn encode(
        &self,
        texts: &[&str],
        batch_size: usize,
        max_length: usize,
    ) -> Result<EncodeOutput, EmbedderError> {
        if batch_size == 0 {
            return Err(EmbedderError::InvalidInput(
                "batch_size must be positive".to_string(),
            ));
        }

        let mut rows = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            debug!(count = chunk.len(), "Encoding batch");
            rows.extend(self.encode_chunk(chunk, max_length)?);
        }

        Ok(EncodeOutput {
            dense_vecs: DenseVecs::from_rows(rows)?,
        })
    }
}

/// Extract one vector per sequence from the model output.
///
/// `dims` is either `[batch, hidden]` (the graph already pooled) or
/// `[batch, seq_len, hidden]`, in which case the first (CLS) token is used.
fn cls_pooling(
    data: &[f32],
    dims: &[usize],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let (rows, stride, hidden) = match *dims {
        [b, h] => (b, h, h),
        [b, s, h] => (b, s * h, h),
        _ => {
            return Err(EmbedderError::InferenceFailed(format!(
                "unexpected output shape {dims:?}"
            )));
        }
    };

    if rows != batch_size {
        return Err(EmbedderError::OutputCountMismatch {
            expected: batch_size,
            actual: rows,
        });
    }
    if data.len() < rows * stride {
        return Err(EmbedderError::InferenceFailed(format!(
            "output has {} values, shape {dims:?} needs {}",
            data.len(),
            rows * stride
        )));
    }

    Ok((0..rows)
        .map(|r| data[r * stride..r * stride + hidden].to_vec())
        .collect())
}

/// L2-normalize a vector, returning the normalized copy.
fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return vec.to_vec();
    }

    let inv_norm = 1.0 / norm_sq.sqrt();
    vec.iter().map(|v| v * inv_norm).collect()
}
