//! # actormatch — Actor Look-alike Matcher
//!
//! Builds a catalog of reference actors from a photo dataset (one averaged
//! CLIP embedding per actor), persists it, and answers nearest-neighbor
//! queries: upload one or more photos, get back the most visually similar
//! actors ranked by cosine similarity.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, validation, and defaults
//! - **[`embedder`]** — Image embedding via ONNX Runtime (CLIP ViT-B/32)
//! - **[`index`]** — Catalog build, persistence, load, and top-k search
//! - **[`matcher`]** — Batch orchestration with bounded concurrent fan-out
//! - **[`server`]** — axum HTTP surface (single and batch match endpoints)

pub mod config;
pub mod embedder;
pub mod index;
pub mod matcher;
pub mod server;
