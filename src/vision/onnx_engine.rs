//! ONNX Runtime glyph classifier
//!
//! Expects a single-glyph network taking a `[1, 1, N, N]` f32 tensor (ink = 1,
//! background = 0) and producing `[1, L]` logits aligned with the label
//! dictionary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::charset::{CharsetConstraint, ClassifierParameters};
use super::classifier::{Candidate, EngineLoader, GlyphEngine, RawClassification};
use super::models::{load_labels, ModelManager};
use super::normalize::NormalizedImage;
use crate::config::EngineConfig;

/// Classifier backed by an ONNX Runtime session
pub struct OnnxGlyphEngine {
    session: Arc<Mutex<Session>>,
    labels: Arc<Vec<String>>,
    input_size: u32,
    top_k: usize,
}

impl OnnxGlyphEngine {
    /// Load the network and label dictionary
    pub fn load(
        model_path: &Path,
        labels_path: &Path,
        input_size: u32,
        top_k: usize,
        intra_threads: usize,
    ) -> Result<Self> {
        info!("Loading ONNX glyph model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let labels = load_labels(labels_path)?;
        info!("Glyph model loaded with {} labels", labels.len());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            labels: Arc::new(labels),
            input_size,
            top_k: top_k.max(1),
        })
    }
}

#[async_trait]
impl GlyphEngine for OnnxGlyphEngine {
    async fn recognize(
        &self,
        image: &NormalizedImage,
        params: &ClassifierParameters,
    ) -> Result<RawClassification> {
        let tensor = to_input_tensor(image, self.input_size);
        let session = self.session.clone();
        let labels = self.labels.clone();
        let charset = params.charset;
        let top_k = self.top_k;

        debug!(
            "Running glyph model ({:?}, {:?})",
            params.charset, params.segmentation
        );

        tokio::task::spawn_blocking(move || {
            let logits = run_session(&mut session.lock(), tensor)?;
            Ok::<_, anyhow::Error>(rank_labels(&logits, &labels, charset, top_k))
        })
        .await
        .context("Inference task panicked")?
    }
}

/// Resize the binarized glyph to the network input and map ink to 1.0
fn to_input_tensor(image: &NormalizedImage, input_size: u32) -> Array4<f32> {
    let gray: GrayImage = image::DynamicImage::ImageRgba8(image.as_rgba().clone()).to_luma8();
    let resized = image::imageops::resize(&gray, input_size, input_size, FilterType::Triangle);

    let n = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, n, n));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = 1.0 - pixel[0] as f32 / 255.0;
    }
    tensor
}

fn run_session(session: &mut Session, tensor: Array4<f32>) -> Result<Vec<f32>> {
    let input = ort::value::Tensor::from_array(tensor).context("Failed to build input tensor")?;
    let outputs = session
        .run(ort::inputs![input])
        .context("ONNX inference failed")?;
    let logits = outputs[0]
        .try_extract_array::<f32>()
        .context("Unexpected model output type")?;
    Ok(logits.iter().copied().collect())
}

/// Softmax over the labels the charset allows and keep the best `top_k`
fn rank_labels(
    logits: &[f32],
    labels: &[String],
    charset: CharsetConstraint,
    top_k: usize,
) -> RawClassification {
    let allowed: Vec<(usize, f32)> = logits
        .iter()
        .zip(labels)
        .enumerate()
        .filter(|(_, (_, label))| charset.allows_label(label))
        .map(|(i, (&logit, _))| (i, logit))
        .collect();

    if allowed.is_empty() {
        return RawClassification::empty();
    }

    let max = allowed.iter().map(|(_, l)| *l).fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = allowed.iter().map(|(_, l)| (l - max).exp()).sum();

    let mut ranked: Vec<Candidate> = allowed
        .iter()
        .map(|&(i, l)| Candidate {
            text: labels[i].clone(),
            confidence: (l - max).exp() / sum * 100.0,
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked.truncate(top_k);

    let best = ranked.remove(0);
    RawClassification {
        text: best.text,
        confidence: best.confidence,
        candidates: ranked,
    }
}

/// Loader that resolves model files and builds an [`OnnxGlyphEngine`]
pub struct OnnxEngineLoader {
    config: EngineConfig,
}

impl OnnxEngineLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLoader for OnnxEngineLoader {
    async fn load(&self) -> Result<Arc<dyn GlyphEngine>> {
        let manager = ModelManager::from_config(&self.config)?;
        let (model_path, labels_path) = manager.ensure_all_models().await?;

        let input_size = self.config.model_input_size;
        let top_k = self.config.top_k;
        let threads = self.config.intra_threads;

        let engine = tokio::task::spawn_blocking(move || {
            OnnxGlyphEngine::load(&model_path, &labels_path, input_size, top_k, threads)
        })
        .await
        .context("Model loading task panicked")??;

        Ok(Arc::new(engine))
    }
}
