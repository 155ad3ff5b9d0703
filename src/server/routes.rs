//! HTTP handlers for the query surface.
//!
//! - `GET  /health`
//! - `POST /match-actors`        — single photo, multipart `file` part
//! - `POST /match-actors-batch`  — multiple photos, multipart `files` parts
//! - `POST /admin/reload-index`  — atomically reload the persisted index
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::config::Config;
use crate::index::{IndexError, MatchResult};
use crate::matcher::{BatchItem, BatchItemOutcome, BatchOutcome, validate_top_k};

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub index_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub actors: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        index_loaded: state.engine.index().is_loaded(),
    })
}

/// Match a single uploaded photo against the catalog.
pub async fn match_actors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MatchQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<MatchResponse>> {
    let top_k = resolve_top_k(&query, &state.config)?;

    let mut file: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        require_image_content_type(field.content_type())?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
        if bytes.len() > state.config.max_upload_bytes {
            return Err(ApiError::PayloadTooLarge(state.config.max_upload_bytes));
        }
        file = Some(bytes.to_vec());
        break;
    }

    let Some(image) = file else {
        return Err(ApiError::BadRequest(
            "upload an image in the 'file' field".to_string(),
        ));
    };

    let results = state.engine.match_one(image, top_k).await?;
    Ok(Json(MatchResponse { results }))
}

/// One uploaded part: either accepted for matching or rejected up front
/// (wrong content type, oversized). Rejected parts keep their position.
enum Slot {
    Ready(BatchItem),
    Rejected { filename: String, error: String },
}

/// Match a batch of uploaded photos. Per-file problems become per-item
/// errors at their position; the rest of the batch is unaffected.
pub async fn match_actors_batch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MatchQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<BatchOutcome>> {
    let top_k = resolve_top_k(&query, &state.config)?;

    let mut slots: Vec<Slot> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();

        if !is_image_content_type(field.content_type()) {
            slots.push(Slot::Rejected {
                filename,
                error: "not an image".to_string(),
            });
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
        if bytes.len() > state.config.max_upload_bytes {
            slots.push(Slot::Rejected {
                filename,
                error: format!("file too large (>{} bytes)", state.config.max_upload_bytes),
            });
            continue;
        }

        slots.push(Slot::Ready(BatchItem {
            filename,
            bytes: bytes.to_vec(),
        }));
    }

    if slots.is_empty() {
        return Err(ApiError::BadRequest("batch contains no images".to_string()));
    }

    let ready: Vec<BatchItem> = slots
        .iter_mut()
        .filter_map(|slot| match slot {
            Slot::Ready(item) => Some(BatchItem {
                filename: std::mem::take(&mut item.filename),
                bytes: std::mem::take(&mut item.bytes),
            }),
            Slot::Rejected { .. } => None,
        })
        .collect();

    let engine_outcome = if ready.is_empty() {
        // Nothing embeddable; every slot was rejected up front
        BatchOutcome {
            successful: 0,
            failed: 0,
            items: Vec::new(),
        }
    } else {
        state.engine.match_batch(ready, top_k).await?
    };

    // Merge engine results back into the original positions
    let mut engine_items = engine_outcome.items.into_iter();
    let mut items: Vec<BatchItemOutcome> = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Slot::Ready(_) => {
                // match_batch preserves order, so ready slots line up 1:1
                if let Some(outcome) = engine_items.next() {
                    items.push(outcome);
                }
            }
            Slot::Rejected { filename, error } => {
                items.push(BatchItemOutcome {
                    filename,
                    results: Vec::new(),
                    error: Some(error),
                });
            }
        }
    }

    let failed = items.iter().filter(|i| i.error.is_some()).count();
    Ok(Json(BatchOutcome {
        successful: items.len() - failed,
        failed,
        items,
    }))
}

/// Reload the persisted index and publish it atomically. In-flight
/// searches keep their snapshot; new ones see the fresh catalog.
pub async fn reload_index(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReloadResponse>> {
    let data_dir = state.config.data_dir();
    let index = state.engine.index().clone();

    // Load runs file IO + normalization; keep it off the async workers
    let actors = tokio::task::spawn_blocking(move || index.reload(&data_dir))
        .await
        .map_err(|e| ApiError::Internal(format!("reload task failed: {e}")))?
        .map_err(|e| match e {
            IndexError::NotBuilt => ApiError::Unavailable,
            other => ApiError::Internal(other.to_string()),
        })?;

    info!("Index reloaded via admin endpoint: {actors} actors");
    Ok(Json(ReloadResponse { actors }))
}

/// Resolve and bounds-check `top_k` before any upload is read, so an
/// out-of-range value is rejected even when every file part would be too.
fn resolve_top_k(query: &MatchQuery, config: &Config) -> ApiResult<usize> {
    let top_k = query.top_k.unwrap_or(config.default_top_k);
    validate_top_k(top_k)?;
    Ok(top_k)
}

fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.starts_with("image/"))
}

fn require_image_content_type(content_type: Option<&str>) -> ApiResult<()> {
    if !is_image_content_type(content_type) {
        return Err(ApiError::BadRequest("upload an image file".to_string()));
    }
    Ok(())
}
