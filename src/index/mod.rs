//! Actor catalog: persisted embedding matrix + metadata, load/save, and the
//! process-wide snapshot holder.
//!
//! The persisted layout is a file pair under the data directory:
//! - `embeddings.bin` — raw little-endian f32, row-major, N×D
//! - `metadata.json` — dimension D plus N `{name, thumbnail}` records,
//!   aligned by row index with the matrix
//!
//! plus an `actors/` directory with one representative thumbnail per actor.
pub mod builder;
pub mod search;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::embedder::l2_normalize;

/// File names inside the data directory.
pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const METADATA_FILE: &str = "metadata.json";
/// Subdirectory holding representative thumbnails, served as `/actors/...`.
pub const THUMBS_DIR: &str = "actors";

/// Errors surfaced by catalog persistence and lookup.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("actor index not built — run `actormatch build-index` first")]
    NotBuilt,

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One reference actor: display name, unit embedding, thumbnail file name.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub embedding: Vec<f32>,
    /// File name under the thumbnails directory, if a copy was saved.
    pub thumbnail: Option<String>,
}

/// A single ranked match returned by [`CatalogIndex::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub name: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Immutable, in-memory catalog of reference actors.
///
/// Entries keep their build order; that order is the tie-break order for
/// equal scores. Never mutated after construction — rebuilds replace the
/// whole index via [`SharedIndex`].
#[derive(Debug)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    dimensions: usize,
}

/// On-disk metadata record, aligned by index with the embedding matrix.
#[derive(Debug, Serialize, Deserialize)]
struct MetaEntry {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    dimensions: usize,
    entries: Vec<MetaEntry>,
}

impl CatalogIndex {
    /// Construct a catalog from already-normalized entries.
    ///
    /// Every entry must have dimension `dimensions`; a mismatch means the
    /// builder produced inconsistent rows and is reported as corruption
    /// rather than silently truncated.
    pub fn new(entries: Vec<CatalogEntry>, dimensions: usize) -> Result<Self, IndexError> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.embedding.len() != dimensions {
                return Err(IndexError::Corrupt(format!(
                    "entry {i} ({}) has dimension {}, expected {dimensions}",
                    entry.name,
                    entry.embedding.len()
                )));
            }
        }
        Ok(Self {
            entries,
            dimensions,
        })
    }

    /// Load the catalog from the persisted file pair.
    ///
    /// A missing file is the distinguished "not built" condition; a row
    /// count mismatch between matrix and metadata is corruption. Rows are
    /// re-normalized on load so search never depends on what the builder
    /// wrote.
    pub fn load(data_dir: &Path) -> Result<Self, IndexError> {
        let emb_path = data_dir.join(EMBEDDINGS_FILE);
        let meta_path = data_dir.join(METADATA_FILE);

        if !emb_path.exists() || !meta_path.exists() {
            return Err(IndexError::NotBuilt);
        }

        let bytes = fs::read(&emb_path)?;
        if bytes.len() % 4 != 0 {
            return Err(IndexError::Corrupt(format!(
                "embedding matrix has {} bytes, not a multiple of 4",
                bytes.len()
            )));
        }
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);

        let meta_raw = fs::read_to_string(&meta_path)?;
        let meta: Metadata = serde_json::from_str(&meta_raw)
            .map_err(|e| IndexError::Corrupt(format!("invalid metadata.json: {e}")))?;

        let dimensions = meta.dimensions;
        if dimensions == 0 && (!floats.is_empty() || !meta.entries.is_empty()) {
            return Err(IndexError::Corrupt(
                "metadata declares zero dimensions for a non-empty catalog".to_string(),
            ));
        }

        let rows = if dimensions == 0 {
            0
        } else {
            if floats.len() % dimensions != 0 {
                return Err(IndexError::Corrupt(format!(
                    "matrix length {} is not a multiple of dimension {dimensions}",
                    floats.len()
                )));
            }
            floats.len() / dimensions
        };

        if rows != meta.entries.len() {
            return Err(IndexError::Corrupt(format!(
                "matrix has {rows} rows but metadata has {} entries",
                meta.entries.len()
            )));
        }

        let entries = meta
            .entries
            .into_iter()
            .enumerate()
            .map(|(i, m)| {
                let mut embedding = floats[i * dimensions..(i + 1) * dimensions].to_vec();
                l2_normalize(&mut embedding);
                CatalogEntry {
                    name: m.name,
                    embedding,
                    thumbnail: m.thumbnail,
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Loaded actor index: {} actors, {} dimensions",
            entries.len(),
            dimensions
        );

        Ok(Self {
            entries,
            dimensions,
        })
    }

    /// Persist the catalog as the matrix + metadata file pair.
    pub fn save(&self, data_dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(data_dir)?;

        let mut floats: Vec<f32> = Vec::with_capacity(self.entries.len() * self.dimensions);
        for entry in &self.entries {
            floats.extend_from_slice(&entry.embedding);
        }
        fs::write(
            data_dir.join(EMBEDDINGS_FILE),
            bytemuck::cast_slice::<f32, u8>(&floats),
        )?;

        let meta = Metadata {
            dimensions: self.dimensions,
            entries: self
                .entries
                .iter()
                .map(|e| MetaEntry {
                    name: e.name.clone(),
                    thumbnail: e.thumbnail.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| IndexError::Corrupt(format!("metadata serialization: {e}")))?;
        fs::write(data_dir.join(METADATA_FILE), json)?;

        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide snapshot holder for the loaded catalog.
///
/// Readers take a cheap `Arc` clone and search it lock-free; a rebuild
/// constructs the new catalog entirely off to the side and [`install`]s it
/// wholesale, so in-flight searches see either the fully-old or fully-new
/// snapshot, never a half-updated one.
///
/// [`install`]: SharedIndex::install
#[derive(Default)]
pub struct SharedIndex {
    inner: RwLock<Option<Arc<CatalogIndex>>>,
}

impl SharedIndex {
    /// Start in the "not built" state.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Current snapshot, or `None` while no index has been loaded.
    pub fn snapshot(&self) -> Option<Arc<CatalogIndex>> {
        self.inner.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Atomically publish a freshly built index.
    pub fn install(&self, index: CatalogIndex) {
        let n = index.len();
        *self.inner.write() = Some(Arc::new(index));
        info!("Actor index installed: {n} actors");
    }

    /// Load the persisted index and publish it atomically.
    ///
    /// On failure the previously installed snapshot (if any) stays in
    /// place, so a bad reload never degrades a serving process.
    pub fn reload(&self, data_dir: &Path) -> Result<usize, IndexError> {
        let index = CatalogIndex::load(data_dir)?;
        let n = index.len();
        self.install(index);
        Ok(n)
    }
}
