/// CLIP image embedder using the `ort` crate.
///
/// Loads the ONNX export of the CLIP ViT-B/32 vision tower, reproduces the
/// CLIPProcessor preprocessing (resize shortest side to 224, center crop,
/// per-channel mean/std normalization), runs inference, and L2-normalizes
/// the resulting 512-dimension vector.
use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::{Embedder, EmbedderError, l2_normalize};

/// Input edge length expected by the vision tower.
const IMAGE_SIZE: u32 = 224;

/// CLIP preprocessing constants (openai/clip-vit-base-patch32).
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// ONNX-backed CLIP embedder implementing the `Embedder` trait.
pub struct ClipEmbedder {
    session: Mutex<Session>,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Create a new `ClipEmbedder` by loading a model from the given directory.
    ///
    /// Expects `model.onnx` in `model_dir`.
    pub fn new(model_dir: &Path) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}",
                model_dir.display()
            )));
        }

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        info!("CLIP vision model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            dimensions: 512, // CLIP ViT-B/32 projection dimension
        })
    }
}

impl Embedder for ClipEmbedder {
    fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedderError> {
        let pixel_values = preprocess(image)?;

        // Create input tensor using (shape, data) tuple form
        // This avoids ndarray version coupling with ort
        let pixel_values_val = Tensor::from_array((
            [1usize, 3, IMAGE_SIZE as usize, IMAGE_SIZE as usize],
            pixel_values,
        ))
        .map_err(|e| EmbedderError::InferenceFailed(format!("pixel_values error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "pixel_values" => pixel_values_val,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Output: image_embeds with shape [batch_size=1, 512]
        let (_shape, embeds) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        if embeds.len() != self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "unexpected output length: {} (want {})",
                embeds.len(),
                self.dimensions
            )));
        }

        let mut embedding = embeds.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Decode + preprocess raw image bytes into NCHW `pixel_values`.
///
/// Resizes the shortest side to 224, center-crops to 224×224, scales to
/// [0, 1], and applies CLIP's per-channel mean/std.
fn preprocess(bytes: &[u8]) -> Result<Vec<f32>, EmbedderError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| EmbedderError::DecodeFailed(e.to_string()))?;

    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(EmbedderError::DecodeFailed("zero-sized image".to_string()));
    }

    // Resize so the shortest side is IMAGE_SIZE, preserving aspect ratio.
    // CatmullRom approximates the bicubic filter CLIPProcessor uses.
    let (new_w, new_h) = if w < h {
        (IMAGE_SIZE, ((h as f64 * IMAGE_SIZE as f64 / w as f64).round() as u32).max(IMAGE_SIZE))
    } else {
        (((w as f64 * IMAGE_SIZE as f64 / h as f64).round() as u32).max(IMAGE_SIZE), IMAGE_SIZE)
    };
    let resized = img.resize_exact(new_w, new_h, FilterType::CatmullRom);

    // Center crop
    let x = (new_w - IMAGE_SIZE) / 2;
    let y = (new_h - IMAGE_SIZE) / 2;
    let cropped = resized.crop_imm(x, y, IMAGE_SIZE, IMAGE_SIZE).to_rgb8();

    // HWC u8 → NCHW f32 with mean/std normalization
    let hw = (IMAGE_SIZE * IMAGE_SIZE) as usize;
    let mut pixel_values = vec![0.0f32; 3 * hw];
    for (i, pixel) in cropped.pixels().enumerate() {
        for c in 0..3 {
            let v = pixel.0[c] as f32 / 255.0;
            pixel_values[c * hw + i] = (v - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }

    Ok(pixel_values)
}
