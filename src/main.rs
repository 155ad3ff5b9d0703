use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use actormatch::config::Config;
use actormatch::embedder::clip::ClipEmbedder;
use actormatch::embedder::{Embedder, download};
use actormatch::index::builder::IndexBuilder;
use actormatch::index::{IndexError, SharedIndex};
use actormatch::matcher::MatchEngine;
use actormatch::server::{self, AppState};

#[derive(Parser)]
#[command(name = "actormatch", version, about = "Actor look-alike matcher")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,

    /// Build the actor index from a photo dataset
    BuildIndex {
        /// Dataset root with one subdirectory per actor
        #[arg(long, conflicts_with = "csv")]
        dataset_dir: Option<PathBuf>,

        /// CSV file with `name,image_path` columns
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::BuildIndex { dataset_dir, csv } => build_index(config, dataset_dir, csv),
    }
}

async fn serve(config: Config) -> Result<()> {
    let config = Arc::new(config);

    // 1. Embedder (downloads the ONNX model on first run)
    let model_dir = config.model_dir();
    download::download_model_files(&model_dir).context("model download failed")?;
    let embedder: Arc<dyn Embedder> =
        Arc::new(ClipEmbedder::new(&model_dir).context("failed to load CLIP model")?);

    // 2. Index: a missing index is not fatal — the server starts and
    //    answers 503 until one is built and reloaded
    let index = Arc::new(SharedIndex::empty());
    match index.reload(&config.data_dir()) {
        Ok(n) => {
            tracing::info!("Actor index ready: {n} actors");
            if let Some(snapshot) = index.snapshot() {
                anyhow::ensure!(
                    snapshot.is_empty() || snapshot.dimensions() == embedder.dimensions(),
                    "index dimension {} does not match the embedder's {} — rebuild the index",
                    snapshot.dimensions(),
                    embedder.dimensions()
                );
            }
        }
        Err(IndexError::NotBuilt) => {
            warn!(
                "No actor index in {} — run `actormatch build-index` and POST /admin/reload-index",
                config.data_dir().display()
            );
        }
        Err(e) => return Err(e).context("failed to load actor index"),
    }

    // 3. Engine + HTTP
    let engine = MatchEngine::new(
        embedder,
        index,
        config.batch_concurrency,
        Duration::from_secs(config.embed_timeout_secs),
    );
    let state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    server::serve(state).await
}

fn build_index(config: Config, dataset_dir: Option<PathBuf>, csv: Option<PathBuf>) -> Result<()> {
    let model_dir = config.model_dir();
    download::download_model_files(&model_dir).context("model download failed")?;
    let embedder = ClipEmbedder::new(&model_dir).context("failed to load CLIP model")?;

    let builder = IndexBuilder::new(&embedder, config.data_dir());
    let report = match (dataset_dir, csv) {
        (Some(dir), None) => builder.build_from_dir(&dir)?,
        (None, Some(file)) => builder.build_from_csv(&file)?,
        _ => anyhow::bail!("pass exactly one of --dataset-dir or --csv"),
    };

    println!(
        "Indexed {} actors ({} skipped), {} images embedded, {} failed",
        report.subjects_indexed,
        report.subjects_skipped,
        report.images_embedded,
        report.images_failed
    );
    println!("Index written to {}", config.data_dir().display());
    Ok(())
}
