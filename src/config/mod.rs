//! Application Configuration
//!
//! Recognition, engine and feedback settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::normalize::{DEFAULT_CANVAS_SIZE, DEFAULT_THRESHOLD};
use crate::vision::postprocess::{AlternativePenalty, MAX_ALTERNATIVES};
use crate::vision::validate::DEFAULT_MIN_CONFIDENCE;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pipeline settings
    pub recognition: RecognitionConfig,
    /// Classifier engine settings
    pub engine: EngineConfig,
    /// Feedback log settings
    pub feedback: FeedbackConfig,
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let r = &self.recognition;
        if r.canvas_size == 0 {
            anyhow::bail!("recognition.canvas_size must be greater than zero");
        }
        if !(0.0..=100.0).contains(&r.min_confidence) {
            anyhow::bail!(
                "recognition.min_confidence must be within 0-100, got {}",
                r.min_confidence
            );
        }
        if r.max_alternatives > MAX_ALTERNATIVES {
            anyhow::bail!(
                "recognition.max_alternatives must be at most {}, got {}",
                MAX_ALTERNATIVES,
                r.max_alternatives
            );
        }
        if self.engine.model_input_size == 0 {
            anyhow::bail!("engine.model_input_size must be greater than zero");
        }
        if self.feedback.capacity == 0 {
            anyhow::bail!("feedback.capacity must be greater than zero");
        }
        Ok(())
    }
}

/// Recognition pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Side length of the normalized canvas in pixels
    pub canvas_size: u32,
    /// Luminance threshold separating ink from background
    pub binarize_threshold: u8,
    /// Minimum confidence (0 - 100) for a result to be accepted
    pub min_confidence: f32,
    /// Number of alternatives attached to a result (at most 3)
    pub max_alternatives: usize,
    /// Scoring of confusion-table alternatives
    pub alternative_penalty: AlternativePenalty,
    /// Optional deadline for a whole recognition request
    pub timeout_ms: Option<u64>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            canvas_size: DEFAULT_CANVAS_SIZE,
            binarize_threshold: DEFAULT_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_alternatives: MAX_ALTERNATIVES,
            alternative_penalty: AlternativePenalty::Random,
            timeout_ms: None,
        }
    }
}

/// Classifier engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding glyph.onnx and labels.txt (defaults to the data dir)
    pub models_dir: Option<PathBuf>,
    /// Base URL to download missing model files from
    pub model_base_url: Option<String>,
    /// Expected SHA-256 of glyph.onnx
    pub classifier_sha256: Option<String>,
    /// Expected SHA-256 of labels.txt
    pub labels_sha256: Option<String>,
    /// Side length of the network input
    pub model_input_size: u32,
    /// Number of ranked labels requested from the network
    pub top_k: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            model_base_url: None,
            classifier_sha256: None,
            labels_sha256: None,
            model_input_size: 64,
            top_k: 4,
            intra_threads: 1,
        }
    }
}

/// Where feedback entries are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackBackend {
    /// In-process ring buffer
    #[default]
    Memory,
    /// SQLite database file
    Sqlite,
}

/// Feedback log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Record feedback entries at all
    pub enabled: bool,
    /// Storage backend
    pub backend: FeedbackBackend,
    /// Maximum number of entries kept
    pub capacity: usize,
    /// SQLite database path (defaults to `<data dir>/feedback.db`)
    pub database_path: Option<PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: FeedbackBackend::Memory,
            capacity: 100,
            database_path: None,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
