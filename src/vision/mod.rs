//! Vision Layer
//!
//! Recognizes a single hand-drawn glyph:
//! - normalization of the canvas snapshot into a binarized square
//! - classification with a lazily initialized engine
//! - cleanup and alternative candidates
//! - validation against the expected character class

pub mod charset;
pub mod classifier;
pub mod confusion;
pub mod error;
pub mod models;
pub mod normalize;
pub mod onnx_engine;
pub mod postprocess;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::storage::{FeedbackEntry, FeedbackRecorder};

pub use charset::{ClassifierParameters, CharsetConstraint, ExpectedCharacterClass, Segmentation};
pub use classifier::{ClassifierAdapter, EngineLoader, GlyphEngine, RawClassification};
pub use confusion::ConfusionTable;
pub use error::{FailureKind, RecognitionError};
pub use normalize::{NormalizeConfig, NormalizedImage, RecognitionInput};
pub use onnx_engine::{OnnxEngineLoader, OnnxGlyphEngine};
pub use postprocess::{AlternativePenalty, PostProcessor};

/// Alternative reading of a drawing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub text: String,
    /// Confidence in percent (0 - 100)
    pub confidence: f32,
}

/// Outcome of one recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Recognized characters, possibly empty
    pub text: String,
    /// Confidence in percent (0 - 100)
    pub confidence: f32,
    /// At most three alternatives, highest confidence first
    pub alternatives: Vec<Alternative>,
}

impl RecognitionResult {
    /// Empty, zero-confidence result
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Stages a request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Normalizing,
    Classifying,
    PostProcessing,
    Validated,
    Failed,
}

/// What the caller gets back from a recognition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    /// Always well formed; empty when the request failed
    pub result: RecognitionResult,
    /// Whether the result may be shown as recognized
    pub accepted: bool,
    /// Terminal stage, `Validated` or `Failed`
    pub stage: PipelineStage,
    /// Why the request failed, if it did
    pub failure: Option<FailureKind>,
    /// Wall time spent on the request
    pub processing_time_ms: u64,
}

/// Recognition pipeline
pub struct RecognitionPipeline {
    classifier: ClassifierAdapter,
    postprocessor: PostProcessor<'static>,
    normalize: NormalizeConfig,
    min_confidence: f32,
    timeout: Option<Duration>,
    feedback: Option<FeedbackRecorder>,
}

impl RecognitionPipeline {
    /// Start building a pipeline around `loader`
    pub fn builder(loader: impl EngineLoader + 'static) -> RecognitionPipelineBuilder {
        RecognitionPipelineBuilder {
            loader: Box::new(loader),
            config: AppConfig::default(),
            table: ConfusionTable::builtin(),
            feedback: None,
        }
    }

    /// Whether the classifier finished initializing
    pub fn is_ready(&self) -> bool {
        self.classifier.is_ready()
    }

    /// Initialize the classifier ahead of the first request
    pub async fn warm_up(&self) -> Result<(), RecognitionError> {
        self.classifier.engine().await.map(|_| ())
    }

    /// Recognize a drawing. Never fails; failures yield an empty result.
    pub async fn recognize(
        &self,
        input: &RecognitionInput,
        expected: ExpectedCharacterClass,
    ) -> RecognitionOutcome {
        let start = Instant::now();
        match self.run(input, expected).await {
            Ok((result, accepted)) => RecognitionOutcome {
                result,
                accepted,
                stage: PipelineStage::Validated,
                failure: None,
                processing_time_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => failed(e, start),
        }
    }

    /// Like [`recognize`](Self::recognize) but bounded by the configured
    /// timeout, if any
    pub async fn recognize_with_timeout(
        &self,
        input: &RecognitionInput,
        expected: ExpectedCharacterClass,
    ) -> RecognitionOutcome {
        let Some(timeout) = self.timeout else {
            return self.recognize(input, expected).await;
        };

        let start = Instant::now();
        match tokio::time::timeout(timeout, self.recognize(input, expected)).await {
            Ok(outcome) => outcome,
            Err(_) => failed(RecognitionError::TimedOut(timeout.as_millis() as u64), start),
        }
    }

    async fn run(
        &self,
        input: &RecognitionInput,
        expected: ExpectedCharacterClass,
    ) -> Result<(RecognitionResult, bool), RecognitionError> {
        debug!("{:?} -> {:?}", PipelineStage::Idle, PipelineStage::Normalizing);
        let image = normalize_blocking(input.clone(), self.normalize).await?;
        debug!(
            "{:?} -> {:?} (ink ratio {:.3})",
            PipelineStage::Normalizing,
            PipelineStage::Classifying,
            image.ink_ratio()
        );

        let raw = self.classifier.try_classify(&image, expected).await?;
        debug!("{:?} -> {:?}", PipelineStage::Classifying, PipelineStage::PostProcessing);

        let result = self.postprocessor.postprocess(&raw);
        let accepted = validate::validate_with_threshold(&result, expected, self.min_confidence);
        debug!(
            "{:?}: '{}' ({:.1}%, accepted: {}, {} alternatives)",
            PipelineStage::Validated,
            result.text,
            result.confidence,
            accepted,
            result.alternatives.len()
        );

        Ok((result, accepted))
    }

    /// Record a drawing with its expected answer and the produced result.
    ///
    /// Does nothing when feedback is disabled; failures are logged only.
    pub fn submit_feedback(
        &self,
        input: &RecognitionInput,
        expected_answer: &str,
        result: &RecognitionResult,
    ) {
        let Some(recorder) = &self.feedback else {
            return;
        };
        match input.to_png() {
            Ok(png) => recorder.record(FeedbackEntry::new(png, expected_answer, result.clone())),
            Err(e) => warn!("Skipping feedback entry: {}", e),
        }
    }
}

/// Decode and normalize on the blocking pool
async fn normalize_blocking(
    input: RecognitionInput,
    config: NormalizeConfig,
) -> Result<NormalizedImage, RecognitionError> {
    tokio::task::spawn_blocking(move || normalize::normalize(&input, &config))
        .await
        .map_err(|e| RecognitionError::Decode(format!("normalization task failed: {}", e)))?
}

fn failed(error: RecognitionError, start: Instant) -> RecognitionOutcome {
    warn!("Recognition failed: {}", error);
    RecognitionOutcome {
        result: RecognitionResult::empty(),
        accepted: false,
        stage: PipelineStage::Failed,
        failure: Some(error.kind()),
        processing_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Composition root for [`RecognitionPipeline`]
pub struct RecognitionPipelineBuilder {
    loader: Box<dyn EngineLoader>,
    config: AppConfig,
    table: &'static ConfusionTable,
    feedback: Option<FeedbackRecorder>,
}

impl RecognitionPipelineBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different confusion table
    pub fn confusion_table(mut self, table: &'static ConfusionTable) -> Self {
        self.table = table;
        self
    }

    pub fn feedback(mut self, recorder: FeedbackRecorder) -> Self {
        self.feedback = Some(recorder);
        self
    }

    pub fn build(self) -> RecognitionPipeline {
        let r = &self.config.recognition;
        info!(
            "Recognition pipeline: {}px canvas, threshold {}, min confidence {}",
            r.canvas_size, r.binarize_threshold, r.min_confidence
        );

        RecognitionPipeline {
            classifier: ClassifierAdapter::from_boxed(self.loader),
            postprocessor: PostProcessor::new(self.table)
                .with_penalty(r.alternative_penalty)
                .with_max_alternatives(r.max_alternatives),
            normalize: NormalizeConfig {
                canvas_size: r.canvas_size,
                threshold: r.binarize_threshold,
            },
            min_confidence: r.min_confidence,
            timeout: r.timeout_ms.map(Duration::from_millis),
            feedback: self.feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::classifier::testing::{CountingLoader, ScriptedEngine};
    use super::*;
    use crate::storage::{FeedbackStore, MemoryFeedbackStore};
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn drawing() -> RecognitionInput {
        RecognitionInput::Rgba(RgbaImage::from_fn(120, 80, |x, y| {
            if x.abs_diff(60) < 6 || y.abs_diff(40) < 6 {
                Rgba([10, 10, 10, 255])
            } else {
                Rgba([250, 250, 250, 255])
            }
        }))
    }

    fn pipeline(engine: ScriptedEngine) -> RecognitionPipeline {
        RecognitionPipeline::builder(CountingLoader::new(engine)).build()
    }

    #[tokio::test]
    async fn test_recognize_accepts_matching_class() {
        let pipeline = pipeline(ScriptedEngine::answering("あ", 88.0));
        let outcome = pipeline
            .recognize(&drawing(), ExpectedCharacterClass::Hiragana)
            .await;

        assert_eq!(outcome.stage, PipelineStage::Validated);
        assert!(outcome.accepted);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.result.text, "あ");
        assert_eq!(outcome.result.alternatives.len(), 3);
        assert!(outcome.result.alternatives.iter().all(|a| a.text != "あ"));
    }

    #[tokio::test]
    async fn test_recognize_rejects_wrong_class() {
        let pipeline = pipeline(ScriptedEngine::answering("ア", 88.0));
        let outcome = pipeline
            .recognize(&drawing(), ExpectedCharacterClass::Hiragana)
            .await;
        assert_eq!(outcome.stage, PipelineStage::Validated);
        assert!(!outcome.accepted);
        assert_eq!(outcome.result.text, "ア");
    }

    #[tokio::test]
    async fn test_number_mode_normalizes_full_width() {
        let pipeline = pipeline(ScriptedEngine::answering("５", 75.0));
        let outcome = pipeline.recognize(&drawing(), ExpectedCharacterClass::Digit).await;
        assert_eq!(outcome.result.text, "5");
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn test_classifier_failure_is_absorbed() {
        let pipeline = pipeline(ScriptedEngine::failing("inference exploded"));
        let outcome = pipeline.recognize(&drawing(), ExpectedCharacterClass::Any).await;
        assert_eq!(outcome.result, RecognitionResult::empty());
        assert!(!outcome.accepted);
        assert_eq!(outcome.stage, PipelineStage::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::ClassificationFailure));
    }

    #[tokio::test]
    async fn test_decode_failure_is_absorbed() {
        let pipeline = pipeline(ScriptedEngine::answering("あ", 90.0));
        let outcome = pipeline
            .recognize(&RecognitionInput::Encoded(b"garbage".to_vec()), ExpectedCharacterClass::Any)
            .await;
        assert_eq!(outcome.result, RecognitionResult::empty());
        assert_eq!(outcome.failure, Some(FailureKind::Decode));
        assert!(!pipeline.is_ready());
    }

    #[tokio::test]
    async fn test_engine_unavailable_is_absorbed() {
        let pipeline = RecognitionPipeline::builder(CountingLoader::broken()).build();
        let outcome = pipeline.recognize(&drawing(), ExpectedCharacterClass::Any).await;
        assert_eq!(outcome.result, RecognitionResult::empty());
        assert_eq!(outcome.failure, Some(FailureKind::EngineUnavailable));
        assert!(pipeline.warm_up().await.is_err());
    }

    #[tokio::test]
    async fn test_low_confidence_is_not_accepted() {
        let pipeline = pipeline(ScriptedEngine::answering("あ", 12.0));
        let outcome = pipeline.recognize(&drawing(), ExpectedCharacterClass::Any).await;
        assert_eq!(outcome.stage, PipelineStage::Validated);
        assert_eq!(outcome.result.text, "あ");
        assert!(!outcome.accepted);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_initialize_once() {
        let loader = CountingLoader::new(ScriptedEngine::answering("1", 90.0));
        let loads = loader.loads.clone();
        let pipeline = RecognitionPipeline::builder(loader).build();
        let input = drawing();

        let (a, b) = tokio::join!(
            pipeline.recognize(&input, ExpectedCharacterClass::Digit),
            pipeline.recognize(&input, ExpectedCharacterClass::Digit),
        );
        assert!(a.accepted && b.accepted);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_result() {
        let mut engine = ScriptedEngine::answering("あ", 90.0);
        engine.delay = Duration::from_millis(500);
        let mut config = AppConfig::default();
        config.recognition.timeout_ms = Some(50);

        let pipeline = RecognitionPipeline::builder(CountingLoader::new(engine))
            .config(config)
            .build();
        let outcome = pipeline
            .recognize_with_timeout(&drawing(), ExpectedCharacterClass::Any)
            .await;
        assert_eq!(outcome.failure, Some(FailureKind::TimedOut));
        assert_eq!(outcome.result, RecognitionResult::empty());
    }

    #[tokio::test]
    async fn test_rank_decay_config_is_applied() {
        let mut config = AppConfig::default();
        config.recognition.alternative_penalty = AlternativePenalty::RankDecay;
        config.recognition.max_alternatives = 2;

        let pipeline = RecognitionPipeline::builder(CountingLoader::new(ScriptedEngine::answering("あ", 90.0)))
            .config(config)
            .build();
        let outcome = pipeline.recognize(&drawing(), ExpectedCharacterClass::Any).await;
        let scored: Vec<_> = outcome
            .result
            .alternatives
            .iter()
            .map(|a| (a.text.as_str(), a.confidence))
            .collect();
        assert_eq!(scored, vec![("お", 80.0), ("む", 70.0)]);
    }

    #[tokio::test]
    async fn test_feedback_is_recorded() {
        let store = Arc::new(Mutex::new(MemoryFeedbackStore::new(5)));
        let recorder = FeedbackRecorder::spawn(store.clone()).unwrap();
        let pipeline = RecognitionPipeline::builder(CountingLoader::new(ScriptedEngine::answering("い", 80.0)))
            .feedback(recorder)
            .build();

        let input = drawing();
        let outcome = pipeline.recognize(&input, ExpectedCharacterClass::Hiragana).await;
        pipeline.submit_feedback(&input, "い", &outcome.result);
        drop(pipeline);

        let entries = store.lock().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].expected_answer, "い");
        assert_eq!(entries[0].result.text, "い");
        assert!(entries[0].image_png.starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = RecognitionOutcome {
            result: RecognitionResult::empty(),
            accepted: false,
            stage: PipelineStage::Failed,
            failure: Some(FailureKind::Decode),
            processing_time_ms: 3,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["stage"], "failed");
        assert_eq!(json["failure"], "decode");
        assert_eq!(json["result"]["text"], "");
    }

    #[tokio::test]
    async fn test_normalization_on_blocking_pool() {
        let config = NormalizeConfig::default();
        let off_thread = normalize_blocking(drawing(), config).await.unwrap();
        let inline = normalize::normalize(&drawing(), &config).unwrap();
        assert_eq!(off_thread, inline);

        let err = normalize_blocking(RecognitionInput::Encoded(vec![]), config)
            .await
            .unwrap_err();
        assert!(matches!(err, RecognitionError::Decode(_)));
    }
}
