//! Classifier adapter
//!
//! Wraps a glyph recognition engine behind a lazily initialized handle.
//! Setup runs at most once at a time; callers arriving while it is in flight
//! wait for the same initialization instead of starting their own.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::charset::{to_half_width_digits, ClassifierParameters, ExpectedCharacterClass};
use super::error::RecognitionError;
use super::normalize::NormalizedImage;

/// Ranked label reported by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    /// Confidence in percent (0 - 100)
    pub confidence: f32,
}

/// Engine output before cleanup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawClassification {
    /// Best-guess text
    pub text: String,
    /// Confidence in percent (0 - 100)
    pub confidence: f32,
    /// Further ranked labels, empty when the engine cannot rank
    pub candidates: Vec<Candidate>,
}

impl RawClassification {
    /// Empty, zero-confidence classification
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Inference half of a recognition engine
#[async_trait]
pub trait GlyphEngine: Send + Sync {
    /// Classify a normalized drawing under the given parameters
    async fn recognize(
        &self,
        image: &NormalizedImage,
        params: &ClassifierParameters,
    ) -> Result<RawClassification>;
}

/// Setup half of a recognition engine
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Load models and build a ready engine
    async fn load(&self) -> Result<Arc<dyn GlyphEngine>>;
}

type EngineSetup = Shared<BoxFuture<'static, Result<Arc<dyn GlyphEngine>, RecognitionError>>>;

/// Lazily initialized classifier
pub struct ClassifierAdapter {
    loader: Arc<dyn EngineLoader>,
    engine: OnceLock<Arc<dyn GlyphEngine>>,
    /// Setup attempt in flight, shared by every caller that arrives meanwhile
    setup: Mutex<Option<EngineSetup>>,
}

impl ClassifierAdapter {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self::from_boxed(Box::new(loader))
    }

    pub fn from_boxed(loader: Box<dyn EngineLoader>) -> Self {
        Self {
            loader: Arc::from(loader),
            engine: OnceLock::new(),
            setup: Mutex::new(None),
        }
    }

    /// Whether the engine finished initializing
    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }

    /// Initialize the engine if needed and return it.
    ///
    /// A failed attempt is reported to every caller that joined it and is
    /// retried by the next call after it settles.
    pub async fn engine(&self) -> Result<&Arc<dyn GlyphEngine>, RecognitionError> {
        if let Some(engine) = self.engine.get() {
            return Ok(engine);
        }

        let setup = {
            let mut slot = self.setup.lock();
            if let Some(engine) = self.engine.get() {
                return Ok(engine);
            }
            match slot.as_ref() {
                Some(setup) => setup.clone(),
                None => {
                    let setup = start_setup(self.loader.clone());
                    *slot = Some(setup.clone());
                    setup
                }
            }
        };

        let outcome = setup.clone().await;

        let mut slot = self.setup.lock();
        // Publish before releasing the slot so later callers see the engine
        let published = outcome.map(|engine| self.engine.get_or_init(|| engine));
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&setup)) {
            *slot = None;
        }
        drop(slot);

        published
    }

    /// Classify, reporting inference failures to the caller
    pub async fn try_classify(
        &self,
        image: &NormalizedImage,
        class: ExpectedCharacterClass,
    ) -> Result<RawClassification, RecognitionError> {
        let engine = self.engine().await?;
        let params = class.parameters();

        debug!("Classifying as {} with {:?}", class, params);

        let mut raw = engine
            .recognize(image, params)
            .await
            .map_err(|e| RecognitionError::ClassificationFailure(format!("{:#}", e)))?;

        if params.normalize_full_width_digits {
            raw.text = to_half_width_digits(&raw.text);
            for candidate in &mut raw.candidates {
                candidate.text = to_half_width_digits(&candidate.text);
            }
        }

        Ok(raw)
    }

    /// Classify, absorbing inference failures into an empty result.
    ///
    /// Only a failed engine initialization is reported as an error.
    pub async fn classify(
        &self,
        image: &NormalizedImage,
        class: ExpectedCharacterClass,
    ) -> Result<RawClassification, RecognitionError> {
        match self.try_classify(image, class).await {
            Ok(raw) => Ok(raw),
            Err(RecognitionError::ClassificationFailure(msg)) => {
                warn!("Classification failed, returning empty result: {}", msg);
                Ok(RawClassification::empty())
            }
            Err(e) => Err(e),
        }
    }
}

fn start_setup(loader: Arc<dyn EngineLoader>) -> EngineSetup {
    async move {
        info!("Initializing glyph classifier engine");
        match loader.load().await {
            Ok(engine) => {
                info!("Glyph classifier engine ready");
                Ok(engine)
            }
            Err(e) => {
                warn!("Classifier engine failed to initialize: {:#}", e);
                Err(RecognitionError::EngineUnavailable(format!("{:#}", e)))
            }
        }
    }
    .boxed()
    .shared()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::vision::normalize::{normalize_image, NormalizeConfig};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::atomic::Ordering;

    fn blank() -> NormalizedImage {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
        normalize_image(&DynamicImage::ImageRgba8(img), &NormalizeConfig::default())
    }

    #[tokio::test]
    async fn test_single_initialization_under_concurrency() {
        let loader = CountingLoader::new(ScriptedEngine::answering("あ", 90.0));
        let loads = loader.loads.clone();
        let adapter = ClassifierAdapter::new(loader);
        let image = blank();

        let (a, b) = tokio::join!(
            adapter.classify(&image, ExpectedCharacterClass::Hiragana),
            adapter.classify(&image, ExpectedCharacterClass::Hiragana),
        );

        assert_eq!(a.unwrap().text, "あ");
        assert_eq!(b.unwrap().text, "あ");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(adapter.is_ready());

        adapter.classify(&image, ExpectedCharacterClass::Any).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initialization_failure_is_engine_unavailable() {
        let loader = CountingLoader::broken();
        let loads = loader.loads.clone();
        let adapter = ClassifierAdapter::new(loader);

        let err = adapter
            .classify(&blank(), ExpectedCharacterClass::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::EngineUnavailable(_)));
        assert!(!adapter.is_ready());

        // Failed setup is retried on the next call
        let _ = adapter.classify(&blank(), ExpectedCharacterClass::Any).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failed_initialization() {
        let loader = CountingLoader::broken();
        let loads = loader.loads.clone();
        let adapter = ClassifierAdapter::new(loader);
        let image = blank();

        let (a, b, c) = tokio::join!(
            adapter.classify(&image, ExpectedCharacterClass::Any),
            adapter.classify(&image, ExpectedCharacterClass::Hiragana),
            adapter.classify(&image, ExpectedCharacterClass::Digit),
        );

        for result in [a, b, c] {
            assert!(matches!(result, Err(RecognitionError::EngineUnavailable(_))));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!adapter.is_ready());
    }

    #[tokio::test]
    async fn test_inference_failure_is_absorbed() {
        let adapter = ClassifierAdapter::new(CountingLoader::new(ScriptedEngine::failing("boom")));
        let raw = adapter
            .classify(&blank(), ExpectedCharacterClass::Any)
            .await
            .unwrap();
        assert_eq!(raw, RawClassification::empty());

        let err = adapter
            .try_classify(&blank(), ExpectedCharacterClass::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::ClassificationFailure(_)));
    }

    #[tokio::test]
    async fn test_full_width_digits_normalized_in_number_mode() {
        let adapter = ClassifierAdapter::new(CountingLoader::new(ScriptedEngine::answering("５", 80.0)));
        let raw = adapter
            .classify(&blank(), ExpectedCharacterClass::Digit)
            .await
            .unwrap();
        assert_eq!(raw.text, "5");

        let raw = adapter
            .classify(&blank(), ExpectedCharacterClass::Any)
            .await
            .unwrap();
        assert_eq!(raw.text, "５");
    }

    #[tokio::test]
    async fn test_parameters_follow_requested_class() {
        let loader = CountingLoader::new(ScriptedEngine::answering("ア", 80.0));
        let engine = loader.engine.clone();
        let adapter = ClassifierAdapter::new(loader);

        for class in ExpectedCharacterClass::ALL {
            adapter.classify(&blank(), class).await.unwrap();
        }

        let seen = engine.seen.lock().clone();
        let expected: Vec<_> = ExpectedCharacterClass::ALL.iter().map(|c| *c.parameters()).collect();
        assert_eq!(seen, expected);
    }
}
