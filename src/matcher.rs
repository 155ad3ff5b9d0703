//! Batch orchestrator: turns uploaded photos into position-aligned top-k
//! match lists, tolerating per-image failures.
//!
//! Each image is embedded on the blocking pool under a timeout and searched
//! against one catalog snapshot taken before the fan-out. The fan-out is
//! bounded (`buffer_unordered`), and completed items carry their input
//! index so the response is assembled in input order no matter what order
//! they finish in.
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::embedder::{Embedder, EmbedderError, l2_normalize};
use crate::index::{MatchResult, SharedIndex};

/// Supported `top_k` range and default, shared by all query surfaces.
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 10;
pub const DEFAULT_TOP_K: usize = 3;

/// Errors that abort a whole request (never caused by a single bad image
/// within a batch).
#[derive(Error, Debug)]
pub enum MatchError {
    /// The catalog has never been built/loaded. Distinct from "no matches".
    #[error("actor index not built")]
    Unavailable,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Single-image surface only; inside a batch the same failure becomes
    /// an empty slot instead.
    #[error("image processing failed: {0}")]
    Embed(#[from] EmbedderError),
}

/// One photo in a batch request.
pub struct BatchItem {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Per-position outcome: either ranked results or a recorded failure.
#[derive(Debug, Serialize)]
pub struct BatchItemOutcome {
    pub filename: String,
    /// Empty when this image failed; the rest of the batch is unaffected.
    pub results: Vec<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Order-preserving batch response.
///
/// `successful`/`failed` counts let a caller tell an all-failed batch
/// apart from "no similar actors found".
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub successful: usize,
    pub failed: usize,
    pub items: Vec<BatchItemOutcome>,
}

/// Drives the embedder and catalog search for single and batch queries.
pub struct MatchEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<SharedIndex>,
    concurrency: usize,
    embed_timeout: Duration,
}

impl MatchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<SharedIndex>,
        concurrency: usize,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            concurrency: concurrency.max(1),
            embed_timeout,
        }
    }

    pub fn index(&self) -> &Arc<SharedIndex> {
        &self.index
    }

    /// Match a single photo against the catalog.
    pub async fn match_one(
        &self,
        image: Vec<u8>,
        top_k: usize,
    ) -> Result<Vec<MatchResult>, MatchError> {
        validate_top_k(top_k)?;
        let index = self.index.snapshot().ok_or(MatchError::Unavailable)?;

        let embedder = self.embedder.clone();
        let mut embedding = match tokio::time::timeout(
            self.embed_timeout,
            tokio::task::spawn_blocking(move || embedder.embed(&image)),
        )
        .await
        {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => {
                return Err(MatchError::Embed(EmbedderError::InferenceFailed(format!(
                    "embedding task failed: {join_err}"
                ))));
            }
            Err(_) => {
                return Err(MatchError::Embed(EmbedderError::InferenceFailed(
                    "embedding timed out".to_string(),
                )));
            }
        };

        // Normalize on receipt; the provider's promise is not load-bearing
        l2_normalize(&mut embedding);
        Ok(index.search(&embedding, top_k))
    }

    /// Match a batch of photos, one independent query per item.
    ///
    /// Fails as a whole only when the index is unavailable or the request
    /// itself is malformed; a bad image yields an empty slot at its
    /// position. Dropping the returned future stops issuing new per-image
    /// work (in-flight embeddings may complete and are discarded).
    pub async fn match_batch(
        &self,
        items: Vec<BatchItem>,
        top_k: usize,
    ) -> Result<BatchOutcome, MatchError> {
        validate_top_k(top_k)?;
        if items.is_empty() {
            return Err(MatchError::InvalidParameter(
                "batch contains no images".to_string(),
            ));
        }

        // One snapshot for the whole batch: every position is ranked
        // against the same catalog even if a reload lands mid-flight
        let index = self.index.snapshot().ok_or(MatchError::Unavailable)?;

        let embed_timeout = self.embed_timeout;
        let mut outcomes: Vec<(usize, BatchItemOutcome)> =
            stream::iter(items.into_iter().enumerate().map(|(pos, item)| {
                let embedder = self.embedder.clone();
                let index = index.clone();
                async move {
                    let BatchItem { filename, bytes } = item;
                    let embedded = tokio::time::timeout(
                        embed_timeout,
                        tokio::task::spawn_blocking(move || embedder.embed(&bytes)),
                    )
                    .await;

                    let outcome = match embedded {
                        Ok(Ok(Ok(mut embedding))) => {
                            l2_normalize(&mut embedding);
                            BatchItemOutcome {
                                filename,
                                results: index.search(&embedding, top_k),
                                error: None,
                            }
                        }
                        Ok(Ok(Err(e))) => {
                            warn!("Batch image {filename:?} failed to embed: {e}");
                            failed_item(filename, e.to_string())
                        }
                        Ok(Err(join_err)) => {
                            warn!("Batch image {filename:?} task failed: {join_err}");
                            failed_item(filename, "embedding task failed".to_string())
                        }
                        Err(_) => {
                            warn!("Batch image {filename:?} timed out after {embed_timeout:?}");
                            failed_item(filename, "embedding timed out".to_string())
                        }
                    };
                    (pos, outcome)
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        // Completion order is arbitrary; the response contract is input order
        outcomes.sort_by_key(|(pos, _)| *pos);

        let failed = outcomes.iter().filter(|(_, o)| o.error.is_some()).count();
        let items: Vec<BatchItemOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        Ok(BatchOutcome {
            successful: items.len() - failed,
            failed,
            items,
        })
    }
}

fn failed_item(filename: String, error: String) -> BatchItemOutcome {
    BatchItemOutcome {
        filename,
        results: Vec::new(),
        error: Some(error),
    }
}

/// Reject `top_k` outside the supported range before any work begins.
pub fn validate_top_k(top_k: usize) -> Result<(), MatchError> {
    if !(MIN_TOP_K..=MAX_TOP_K).contains(&top_k) {
        return Err(MatchError::InvalidParameter(format!(
            "top_k must be between {MIN_TOP_K} and {MAX_TOP_K}, got {top_k}"
        )));
    }
    Ok(())
}
