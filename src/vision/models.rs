//! Model management for the glyph classifier
//!
//! Handles locating, downloading, verifying and caching the ONNX model and its
//! label dictionary.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// Environment variable that forbids network downloads
pub const OFFLINE_ENV: &str = "TEGAKI_OFFLINE";

/// Files the classifier needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Single-glyph classifier network
    Classifier,
    /// Label dictionary, one label per line, aligned with the network output
    Labels,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Classifier, ModelType::Labels];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Classifier => "glyph.onnx",
            ModelType::Labels => "labels.txt",
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Classifier => "Glyph Classifier",
            ModelType::Labels => "Label Dictionary",
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix timestamp in seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Model manager for downloading and caching classifier files
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: Option<String>,
    classifier_sha256: Option<String>,
    labels_sha256: Option<String>,
}

impl ModelManager {
    /// Create a model manager from engine settings
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let models_dir = match &config.models_dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };

        Ok(Self {
            base_url: config.model_base_url.clone(),
            classifier_sha256: config.classifier_sha256.clone(),
            labels_sha256: config.labels_sha256.clone(),
            ..Self::with_dir(models_dir)?
        })
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            base_url: None,
            classifier_sha256: None,
            labels_sha256: None,
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    fn expected_sha256(&self, model_type: ModelType) -> Option<&str> {
        match model_type {
            ModelType::Classifier => self.classifier_sha256.as_deref(),
            ModelType::Labels => self.labels_sha256.as_deref(),
        }
    }

    /// Check if a model file is present and non-empty
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Download a model if not already available.
    /// Returns the path to the model file
    pub async fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        let present = self.is_model_available(model_type);
        if present {
            if self.verify_model(model_type)? {
                debug!("Model {:?} already available at {:?}", model_type, path);
                return Ok(path);
            }
            warn!(
                "{} at {:?} does not match its configured checksum",
                model_type.display_name(),
                path
            );
        }

        let Some(base_url) = &self.base_url else {
            if present {
                anyhow::bail!(
                    "{} at {:?} failed checksum verification and no model_base_url is configured",
                    model_type.display_name(),
                    path
                );
            }
            anyhow::bail!(
                "{} not found at {:?} and no model_base_url is configured",
                model_type.display_name(),
                path
            );
        };
        let url = format!("{}/{}", base_url.trim_end_matches('/'), model_type.filename());

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} from {}", model_type.display_name(), url);
        self.download_file(&url, &path, model_type).await?;
        self.update_manifest_for_model(model_type)?;
        info!("Successfully downloaded {}", model_type.display_name());

        Ok(path)
    }

    /// Ensure every required file, returning (classifier, labels) paths
    pub async fn ensure_all_models(&self) -> Result<(PathBuf, PathBuf)> {
        let classifier = self.ensure_model(ModelType::Classifier).await?;
        let labels = self.ensure_model(ModelType::Labels).await?;
        Ok((classifier, labels))
    }

    async fn download_file(&self, url: &str, path: &Path, model_type: ModelType) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        debug!("Download size: {:?} bytes", response.content_length());

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = self.expected_sha256(model_type) {
            if !hash.eq_ignore_ascii_case(expected) {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    model_type.filename(),
                    expected,
                    hash
                );
            }
            info!("Checksum verified for {}", model_type.display_name());
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }

    /// Verify a present file against its configured checksum
    pub fn verify_model(&self, model_type: ModelType) -> Result<bool> {
        let Some(expected) = self.expected_sha256(model_type) else {
            return Ok(true);
        };
        let hash = sha256_file(&self.model_path(model_type))?;
        Ok(hash.eq_ignore_ascii_case(expected))
    }

    fn update_manifest_for_model(&self, model_type: ModelType) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(model_type);
        let metadata = std::fs::metadata(&path)?;

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256: sha256_file(&path)?,
            downloaded_at: unix_now_secs(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Read a label dictionary: one label per line, blank lines skipped
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read labels {:?}", path))?;
    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        anyhow::bail!("Label dictionary {:?} is empty", path);
    }
    Ok(labels)
}
