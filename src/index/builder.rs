//! Index builder: turns a raw actor photo dataset into the persisted
//! catalog file pair plus thumbnail copies.
//!
//! Two dataset shapes are supported:
//! 1. Directory-of-directories: `dataset_dir/<actor name>/*.jpg`
//! 2. CSV with `name,image_path` columns
//!
//! Each actor's representative vector is the re-normalized component-wise
//! mean of its per-image embeddings. Per-image failures only shrink
//! coverage; the build fails outright only when the dataset itself is
//! unreadable or holds no images at all.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::{CatalogEntry, CatalogIndex, THUMBS_DIR};
use crate::embedder::{Embedder, l2_normalize};

/// At most this many images contribute to an actor's averaged embedding.
const MAX_IMAGES_PER_ACTOR: usize = 20;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Counters reported after a build.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Actors with at least one embedded image, written to the catalog.
    pub subjects_indexed: usize,
    /// Actors excluded because none of their images could be embedded.
    pub subjects_skipped: usize,
    pub images_embedded: usize,
    pub images_failed: usize,
}

/// Builds and persists the actor catalog.
///
/// Writes to `data_dir` only; any index already loaded by a serving
/// process is untouched until it reloads.
pub struct IndexBuilder<'a, E: Embedder + ?Sized> {
    embedder: &'a E,
    data_dir: PathBuf,
}

impl<'a, E: Embedder + ?Sized> IndexBuilder<'a, E> {
    pub fn new(embedder: &'a E, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            embedder,
            data_dir: data_dir.into(),
        }
    }

    /// Build from a directory with one subdirectory per actor.
    pub fn build_from_dir(&self, dataset_dir: &Path) -> Result<BuildReport> {
        let groups = group_by_folder(dataset_dir)
            .with_context(|| format!("failed to read dataset: {}", dataset_dir.display()))?;
        self.build(groups)
    }

    /// Build from a CSV file with `name,image_path` columns.
    pub fn build_from_csv(&self, csv_path: &Path) -> Result<BuildReport> {
        let groups = group_by_csv(csv_path)
            .with_context(|| format!("failed to read CSV: {}", csv_path.display()))?;
        self.build(groups)
    }

    fn build(&self, groups: BTreeMap<String, Vec<PathBuf>>) -> Result<BuildReport> {
        let total_images: usize = groups.values().map(Vec::len).sum();
        anyhow::ensure!(total_images > 0, "no images found in dataset");

        let thumbs_dir = self.data_dir.join(THUMBS_DIR);
        fs::create_dir_all(&thumbs_dir).with_context(|| {
            format!("failed to create thumbnails dir: {}", thumbs_dir.display())
        })?;

        let pb = ProgressBar::new(groups.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
                .expect("valid template"),
        );

        let mut report = BuildReport::default();
        let mut entries = Vec::with_capacity(groups.len());

        // BTreeMap iteration is sorted by name, so the row order (and with
        // it the tie-break order) is deterministic across rebuilds.
        for (name, paths) in &groups {
            pb.set_message(name.clone());

            let mut embeddings: Vec<Vec<f32>> = Vec::new();
            let mut thumbnail: Option<String> = None;

            for path in paths.iter().take(MAX_IMAGES_PER_ACTOR) {
                let bytes = match fs::read(path) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("Skipping unreadable image {}: {e}", path.display());
                        report.images_failed += 1;
                        continue;
                    }
                };

                match self.embedder.embed(&bytes) {
                    Ok(embedding) => {
                        report.images_embedded += 1;
                        if thumbnail.is_none() {
                            thumbnail = copy_thumbnail(&thumbs_dir, name, path);
                        }
                        embeddings.push(embedding);
                    }
                    Err(e) => {
                        warn!("Skipping undecodable image {}: {e}", path.display());
                        report.images_failed += 1;
                    }
                }
            }

            if embeddings.is_empty() {
                warn!("Excluding actor {name:?}: no image could be embedded");
                report.subjects_skipped += 1;
                pb.inc(1);
                continue;
            }

            entries.push(CatalogEntry {
                name: name.clone(),
                embedding: mean_embedding(&embeddings),
                thumbnail,
            });
            report.subjects_indexed += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        let index = CatalogIndex::new(entries, self.embedder.dimensions())
            .context("builder produced inconsistent embedding dimensions")?;
        index
            .save(&self.data_dir)
            .with_context(|| format!("failed to persist index to {}", self.data_dir.display()))?;

        info!(
            "Index built: {} actors ({} skipped), {} images embedded, {} failed",
            report.subjects_indexed,
            report.subjects_skipped,
            report.images_embedded,
            report.images_failed
        );

        Ok(report)
    }
}

/// Component-wise mean of unit vectors, re-normalized to unit length.
fn mean_embedding(embeddings: &[Vec<f32>]) -> Vec<f32> {
    let dims = embeddings[0].len();
    let mut mean = vec![0.0f32; dims];
    for embedding in embeddings {
        for (m, v) in mean.iter_mut().zip(embedding) {
            *m += v;
        }
    }
    let inv = 1.0 / embeddings.len() as f32;
    for m in &mut mean {
        *m *= inv;
    }
    l2_normalize(&mut mean);
    mean
}

/// Copy a representative image into the thumbnails directory, returning
/// the stored file name. A copy failure just means no thumbnail.
fn copy_thumbnail(thumbs_dir: &Path, name: &str, src: &Path) -> Option<String> {
    let ext = src
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_lowercase();
    let file_name = format!("{}.{ext}", sanitize_name(name));
    let dest = thumbs_dir.join(&file_name);

    if !dest.exists() {
        if let Err(e) = fs::copy(src, &dest) {
            warn!("Failed to copy thumbnail for {name:?}: {e}");
            return None;
        }
    }
    Some(file_name)
}

/// Make a subject name safe as a single path component. CSV names are
/// arbitrary strings, so separators must not escape the thumbnails dir.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '_',
            _ => c,
        })
        .collect()
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Map each top-level subdirectory to its image files (recursive).
fn group_by_folder(dataset_dir: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for entry in fs::read_dir(dataset_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let mut images = collect_images(&path)?;
        images.sort();
        // Same name reached twice (case/normalization variants on some
        // filesystems) pools into one group rather than two rows
        groups.entry(name.to_string()).or_default().extend(images);
    }

    Ok(groups)
}

/// Recursively collect image files under a directory.
fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            result.extend(collect_images(&path)?);
        } else if is_image_file(&path) {
            result.push(path);
        }
    }
    Ok(result)
}

/// Group CSV rows by actor name. Rows pointing at missing files are
/// skipped with a warning.
fn group_by_csv(csv_path: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    #[derive(serde::Deserialize)]
    struct Row {
        name: String,
        image_path: String,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for row in reader.deserialize::<Row>() {
        let row = row?;
        let name = row.name.trim();
        if name.is_empty() {
            continue;
        }
        let path = PathBuf::from(row.image_path);
        if !path.exists() {
            warn!("CSV row for {name:?} points at missing file: {}", path.display());
            continue;
        }
        groups.entry(name.to_string()).or_default().push(path);
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::index::CatalogIndex;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_dataset(root: &Path, actor: &str, images: &[(&str, &[u8])]) {
        let dir = root.join(actor);
        fs::create_dir_all(&dir).unwrap();
        for (file, bytes) in images {
            fs::write(dir.join(file), bytes).unwrap();
        }
    }

    #[test]
    fn test_build_from_dir() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_dataset(dataset.path(), "Actor A", &[("1.jpg", b"aaa"), ("2.jpg", b"bbb")]);
        write_dataset(dataset.path(), "Actor B", &[("1.png", b"ccc")]);

        let embedder = MockEmbedder::new(16);
        let builder = IndexBuilder::new(&embedder, data.path());
        let report = builder.build_from_dir(dataset.path()).unwrap();

        assert_eq!(report.subjects_indexed, 2);
        assert_eq!(report.subjects_skipped, 0);
        assert_eq!(report.images_embedded, 3);
        assert_eq!(report.images_failed, 0);

        let index = CatalogIndex::load(data.path()).unwrap();
        assert_eq!(index.len(), 2);
        // Sorted-name order
        assert_eq!(index.entries()[0].name, "Actor A");
        assert_eq!(index.entries()[1].name, "Actor B");
        // Thumbnails copied
        assert_eq!(index.entries()[0].thumbnail.as_deref(), Some("Actor_A.jpg"));
        assert!(data.path().join(THUMBS_DIR).join("Actor_A.jpg").exists());
    }

    #[test]
    fn test_build_averaged_embedding_is_unit_length() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_dataset(dataset.path(), "A", &[("1.jpg", b"x"), ("2.jpg", b"y"), ("3.jpg", b"z")]);

        let embedder = MockEmbedder::new(16);
        IndexBuilder::new(&embedder, data.path())
            .build_from_dir(dataset.path())
            .unwrap();

        let index = CatalogIndex::load(data.path()).unwrap();
        let norm: f32 = index.entries()[0]
            .embedding
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_build_is_idempotent() {
        let dataset = tempdir().unwrap();
        write_dataset(dataset.path(), "A", &[("1.jpg", b"img-a"), ("2.jpg", b"img-b")]);

        let embedder = MockEmbedder::new(16);

        let data1 = tempdir().unwrap();
        IndexBuilder::new(&embedder, data1.path())
            .build_from_dir(dataset.path())
            .unwrap();
        let data2 = tempdir().unwrap();
        IndexBuilder::new(&embedder, data2.path())
            .build_from_dir(dataset.path())
            .unwrap();

        let a = CatalogIndex::load(data1.path()).unwrap();
        let b = CatalogIndex::load(data2.path()).unwrap();
        assert_eq!(a.entries()[0].embedding, b.entries()[0].embedding);
    }

    #[test]
    fn test_actor_with_only_bad_images_is_excluded() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        // Empty files make the mock embedder fail
        write_dataset(dataset.path(), "Broken", &[("1.jpg", b"")]);
        write_dataset(dataset.path(), "Good", &[("1.jpg", b"fine")]);

        let embedder = MockEmbedder::new(16);
        let report = IndexBuilder::new(&embedder, data.path())
            .build_from_dir(dataset.path())
            .unwrap();

        assert_eq!(report.subjects_indexed, 1);
        assert_eq!(report.subjects_skipped, 1);
        assert_eq!(report.images_failed, 1);

        let index = CatalogIndex::load(data.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].name, "Good");
    }

    #[test]
    fn test_bad_image_does_not_fail_its_actor() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_dataset(dataset.path(), "A", &[("bad.jpg", b""), ("good.jpg", b"ok")]);

        let embedder = MockEmbedder::new(16);
        let report = IndexBuilder::new(&embedder, data.path())
            .build_from_dir(dataset.path())
            .unwrap();

        assert_eq!(report.subjects_indexed, 1);
        assert_eq!(report.images_embedded, 1);
        assert_eq!(report.images_failed, 1);
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        fs::create_dir_all(dataset.path().join("empty-actor")).unwrap();

        let embedder = MockEmbedder::new(16);
        let err = IndexBuilder::new(&embedder, data.path())
            .build_from_dir(dataset.path())
            .unwrap_err();
        assert!(err.to_string().contains("no images"));
    }

    #[test]
    fn test_non_image_files_are_ignored() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        write_dataset(dataset.path(), "A", &[("photo.jpg", b"ok"), ("notes.txt", b"text")]);

        let embedder = MockEmbedder::new(16);
        let report = IndexBuilder::new(&embedder, data.path())
            .build_from_dir(dataset.path())
            .unwrap();
        assert_eq!(report.images_embedded, 1);
    }

    #[test]
    fn test_csv_duplicate_names_merge() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        let img1 = dataset.path().join("one.jpg");
        let img2 = dataset.path().join("two.jpg");
        fs::write(&img1, b"first").unwrap();
        fs::write(&img2, b"second").unwrap();

        let csv_path = dataset.path().join("list.csv");
        let mut f = fs::File::create(&csv_path).unwrap();
        writeln!(f, "name,image_path").unwrap();
        writeln!(f, "Same Actor,{}", img1.display()).unwrap();
        writeln!(f, "Same Actor,{}", img2.display()).unwrap();

        let embedder = MockEmbedder::new(16);
        let report = IndexBuilder::new(&embedder, data.path())
            .build_from_csv(&csv_path)
            .unwrap();

        // One merged entry, both images pooled into its average
        assert_eq!(report.subjects_indexed, 1);
        assert_eq!(report.images_embedded, 2);
        let index = CatalogIndex::load(data.path()).unwrap();
        assert_eq!(index.len(), 1);

        // The pooled average differs from either single-image embedding
        let single = embedder.embed(b"first").unwrap();
        assert_ne!(index.entries()[0].embedding, single);
    }

    #[test]
    fn test_csv_missing_file_rows_are_skipped() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        let img = dataset.path().join("real.jpg");
        fs::write(&img, b"real").unwrap();

        let csv_path = dataset.path().join("list.csv");
        let mut f = fs::File::create(&csv_path).unwrap();
        writeln!(f, "name,image_path").unwrap();
        writeln!(f, "A,{}", img.display()).unwrap();
        writeln!(f, "B,/nonexistent/file.jpg").unwrap();

        let embedder = MockEmbedder::new(16);
        let report = IndexBuilder::new(&embedder, data.path())
            .build_from_csv(&csv_path)
            .unwrap();
        assert_eq!(report.subjects_indexed, 1);
    }

    #[test]
    fn test_csv_name_with_separators_stays_in_thumbs_dir() {
        let dataset = tempdir().unwrap();
        let data = tempdir().unwrap();
        let img = dataset.path().join("face.jpg");
        fs::write(&img, b"pixels").unwrap();

        let csv_path = dataset.path().join("list.csv");
        let mut f = fs::File::create(&csv_path).unwrap();
        writeln!(f, "name,image_path").unwrap();
        writeln!(f, "../Sneaky/Name,{}", img.display()).unwrap();

        let embedder = MockEmbedder::new(16);
        IndexBuilder::new(&embedder, data.path())
            .build_from_csv(&csv_path)
            .unwrap();

        let index = CatalogIndex::load(data.path()).unwrap();
        let thumb = index.entries()[0].thumbnail.as_deref().unwrap();
        assert!(!thumb.contains('/') && !thumb.contains('\\'), "got {thumb:?}");
        assert!(data.path().join(THUMBS_DIR).join(thumb).exists());
        // Nothing escaped the thumbnails directory
        assert!(!data.path().join("Sneaky").exists());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Song Kang-ho"), "Song_Kang-ho");
        assert_eq!(sanitize_name("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn test_mean_embedding() {
        let mean = mean_embedding(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        // Mean is [0.5, 0.5], renormalized to [√2/2, √2/2]
        assert!((mean[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((mean[1] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
