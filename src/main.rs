use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bgem3::config::EmbedderConfig;
use bgem3::embedder::download::download_model_files;
use bgem3::embedder::{BgeM3Embedder, Embedder, cosine_similarity};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bgem3", version, about = "BGE-M3 dense text embeddings")]
struct Cli {
    /// Config file (JSON or TOML); defaults apply when it doesn't exist
    #[arg(short, long, global = true, default_value = "bgem3.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed one text and print the vector as JSON
    Embed { text: String },

    /// Embed one text per line (stdin when no file is given).
    /// Blank lines are passed through and rejected with their position.
    Batch {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Print the cosine similarity of two texts
    Similarity { a: String, b: String },

    /// Download model files without loading them
    Download,

    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "bgem3.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EmbedderConfig::load(&cli.config)?;

    match cli.command {
        Command::Embed { text } => {
            let embedder = BgeM3Embedder::load(config)?;
            let vector = embedder.embed(&text)?;
            println!("{}", serde_json::to_string(&vector)?);
        }
        Command::Batch { input, batch_size } => {
            let lines = read_lines(open_input(input.as_ref())?)?;
            let texts: Vec<&str> = lines.iter().map(String::as_str).collect();

            let embedder = BgeM3Embedder::load(config)?;
            let vectors = match batch_size {
                Some(size) => embedder.batch_embed_with_size(&texts, size)?,
                None => embedder.batch_embed(&texts)?,
            };
            println!("{}", serde_json::to_string(&vectors)?);
        }
        Command::Similarity { a, b } => {
            let embedder = BgeM3Embedder::load(config)?;
            let vectors = embedder.batch_embed(&[a.as_str(), b.as_str()])?;
            println!("{:.4}", cosine_similarity(&vectors[0], &vectors[1]));
        }
        Command::Download => {
            config.validate()?;
            download_model_files(&config.model, &config.resolved_model_dir())?;
        }
        Command::InitConfig { output } => {
            anyhow::ensure!(!output.exists(), "{} already exists", output.display());
            EmbedderConfig::default().save(&output)?;
            tracing::info!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

/// Open `path`, or stdin when `path` is `None`.
fn open_input(path: Option<&PathBuf>) -> Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(p) => Box::new(BufReader::new(
            std::fs::File::open(p).with_context(|| format!("failed to open {}", p.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    })
}

/// Read every line, blank ones included, so batch positions match line numbers.
fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    reader
        .lines()
        .collect::<io::Result<Vec<_>>>()
        .context("failed to read input")
}
