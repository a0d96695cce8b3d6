//! Tegaki - recognize a hand-drawn glyph from an image file
//!
//! Runs one drawing through the recognition pipeline and prints the outcome
//! as JSON. Useful for checking models and thresholds offline.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tegaki::config::{self, AppConfig, FeedbackBackend};
use tegaki::storage::{self, FeedbackRecorder, MemoryFeedbackStore, SqliteFeedbackStore};
use tegaki::vision::{ExpectedCharacterClass, OnnxEngineLoader, RecognitionInput, RecognitionPipeline};

/// Tegaki - handwritten glyph recognition
#[derive(Parser, Debug)]
#[command(name = "tegaki")]
#[command(about = "Recognize a single hand-drawn kana or digit")]
struct Args {
    /// Image file, or a text file holding a data URL
    image: PathBuf,

    /// Expected character class: hiragana, katakana, number or any
    #[arg(short = 't', long = "type", default_value = "any")]
    recognition_type: ExpectedCharacterClass,

    /// Expected answer, recorded in the feedback log
    #[arg(short, long)]
    expected: Option<String>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the normalized drawing to this PNG file
    #[arg(long)]
    dump_normalized: Option<PathBuf>,

    /// Do not record feedback
    #[arg(long)]
    no_feedback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config(args.config.as_deref())?;

    let input = read_input(&args.image)?;

    if let Some(path) = &args.dump_normalized {
        let normalized = tegaki::vision::normalize::normalize(
            &input,
            &tegaki::vision::NormalizeConfig {
                canvas_size: config.recognition.canvas_size,
                threshold: config.recognition.binarize_threshold,
            },
        )?;
        std::fs::write(path, normalized.to_png()?)
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Normalized drawing written to {:?}", path);
    }

    let mut builder = RecognitionPipeline::builder(OnnxEngineLoader::new(config.engine.clone()))
        .config(config.clone());
    if config.feedback.enabled && !args.no_feedback && args.expected.is_some() {
        builder = builder.feedback(spawn_feedback_recorder(&config)?);
    }
    let pipeline = builder.build();

    let outcome = pipeline
        .recognize_with_timeout(&input, args.recognition_type)
        .await;

    if let Some(expected) = &args.expected {
        pipeline.submit_feedback(&input, expected, &outcome.result);
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    // Dropping the pipeline flushes the feedback writer
    drop(pipeline);
    Ok(())
}

/// Load configuration from an explicit path, the user config dir, or defaults
fn load_or_create_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return Ok(config);
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Read an image file; files starting with `data:` are treated as data URLs
fn read_input(path: &Path) -> Result<RecognitionInput> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    if bytes.starts_with(b"data:") {
        let url = String::from_utf8(bytes).context("Data URL is not valid UTF-8")?;
        return Ok(RecognitionInput::DataUrl(url));
    }
    Ok(RecognitionInput::Encoded(bytes))
}

fn spawn_feedback_recorder(config: &AppConfig) -> Result<FeedbackRecorder> {
    let capacity = config.feedback.capacity;
    match config.feedback.backend {
        FeedbackBackend::Memory => {
            FeedbackRecorder::spawn(Arc::new(Mutex::new(MemoryFeedbackStore::new(capacity))))
        }
        FeedbackBackend::Sqlite => {
            let path = match &config.feedback.database_path {
                Some(path) => path.clone(),
                None => storage::get_data_dir()?.join("feedback.db"),
            };
            let store = SqliteFeedbackStore::open(&path, capacity)?;
            FeedbackRecorder::spawn(Arc::new(Mutex::new(store)))
        }
    }
}
