//! Tegaki - handwritten glyph recognition
//!
//! Recognizes a single hand-drawn hiragana, katakana or digit from a canvas
//! snapshot and decides whether the answer is good enough to accept.

pub mod config;
pub mod storage;
pub mod vision;

pub use config::AppConfig;
pub use vision::{
    ExpectedCharacterClass, RecognitionInput, RecognitionOutcome, RecognitionPipeline,
    RecognitionResult,
};
