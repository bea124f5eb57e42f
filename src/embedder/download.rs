/// Model file auto-download from HuggingFace.
///
/// Downloads the ONNX export and tokenizer of the configured model if they
/// don't already exist locally.
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Base URL for HuggingFace model files.
const HF_BASE: &str = "https://huggingface.co";

/// Files required by the ONNX encoder: (local name, path inside the repo).
///
/// `model.onnx_data` holds the external weights and must sit next to
/// `model.onnx` under exactly that name.
pub const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("model.onnx_data", "onnx/model.onnx_data"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
];

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Resolve the download URL of a file inside the `repo_id` repository.
#[must_use]
pub fn file_url(repo_id: &str, repo_path: &str) -> String {
    format!("{HF_BASE}/{repo_id}/resolve/main/{repo_path}")
}

/// Download model files from HuggingFace if any are missing.
///
/// Creates the model directory if it doesn't exist.
/// Skips individual files that are already present.
pub fn download_model_files(repo_id: &str, model_dir: &Path) -> Result<()> {
    info!("Checking model files in {}", model_dir.display());

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("All model files found, skipping download");
        return Ok(());
    }

    info!("Downloading {repo_id} from HuggingFace (one-time download, ~2.3GB)");

    for &(filename, repo_path) in MODEL_FILES {
        let dest = model_dir.join(filename);

        if dest.exists() {
            info!("File already exists: {filename}");
            continue;
        }

        let url = file_url(repo_id, repo_path);
        info!("Downloading {filename}...");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
        info!("Downloaded {filename}");
    }

    info!("Model download complete");
    Ok(())
}

/// Download a single file with a progress bar.
///
/// Streams into `<dest>.part` and renames on success, so an interrupted
/// download never leaves a file that passes [`all_files_present`].
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let total = resp.content_length().unwrap_or(0);

    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
                .context("invalid progress template")?
                .progress_chars("█▓░"),
        );
        pb
    } else {
        ProgressBar::new_spinner()
    };

    let streamed = stream_to_file(&mut resp, dest, |file| pb.wrap_write(file));
    pb.finish_and_clear();
    streamed
}

/// Stream `body` into `<dest>.part`, then move it into place.
///
/// The partial file is removed when streaming fails, so a broken download
/// never lingers next to the model files.
fn stream_to_file<R, W, F>(body: &mut R, dest: &Path, wrap: F) -> Result<()>
where
    R: Read,
    W: Write,
    F: FnOnce(fs::File) -> W,
{
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;

    let mut writer = wrap(file);
    let copied = io::copy(body, &mut writer).and_then(|_| writer.flush());
    drop(writer);

    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(e).context("failed to stream response body");
    }

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;

    Ok(())
}
