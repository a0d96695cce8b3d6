//! Result shaping: text cleanup and alternative candidates

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::charset::cleanup;
use super::classifier::RawClassification;
use super::confusion::ConfusionTable;
use super::{Alternative, RecognitionResult};

/// Maximum number of alternatives attached to a result
pub const MAX_ALTERNATIVES: usize = 3;

/// Fixed part of the confidence penalty for synthesized alternatives
const BASE_PENALTY: f32 = 10.0;

/// Width of the randomized part of the penalty
const RANDOM_PENALTY_SPAN: f32 = 20.0;

/// How synthesized alternatives are scored below the primary result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativePenalty {
    /// `confidence - 10 - U[0, 20)`, avoids deterministic ties
    #[default]
    Random,
    /// `confidence - 10 * (rank + 1)`, reproducible
    RankDecay,
}

/// Post-processing settings
#[derive(Debug, Clone)]
pub struct PostProcessor<'a> {
    table: &'a ConfusionTable,
    penalty: AlternativePenalty,
    max_alternatives: usize,
}

impl Default for PostProcessor<'static> {
    fn default() -> Self {
        Self::new(ConfusionTable::builtin())
    }
}

impl<'a> PostProcessor<'a> {
    pub fn new(table: &'a ConfusionTable) -> Self {
        Self {
            table,
            penalty: AlternativePenalty::default(),
            max_alternatives: MAX_ALTERNATIVES,
        }
    }

    pub fn with_penalty(mut self, penalty: AlternativePenalty) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_max_alternatives(mut self, max: usize) -> Self {
        self.max_alternatives = max.min(MAX_ALTERNATIVES);
        self
    }

    /// Shape a raw classification into a result using the thread RNG
    pub fn postprocess(&self, raw: &RawClassification) -> RecognitionResult {
        self.postprocess_with_rng(raw, &mut rand::thread_rng())
    }

    /// Shape a raw classification into a result
    pub fn postprocess_with_rng<R: Rng>(
        &self,
        raw: &RawClassification,
        rng: &mut R,
    ) -> RecognitionResult {
        let text = cleanup(&raw.text);
        let confidence = raw.confidence.clamp(0.0, 100.0);

        let Some(first) = text.chars().next() else {
            return RecognitionResult {
                text,
                confidence,
                alternatives: Vec::new(),
            };
        };

        let mut alternatives = if raw.candidates.is_empty() {
            self.synthesize(first, confidence, rng)
        } else {
            engine_alternatives(raw, first)
        };

        alternatives.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        alternatives.truncate(self.max_alternatives);

        RecognitionResult {
            text,
            confidence,
            alternatives,
        }
    }

    /// Alternatives from the confusion table
    fn synthesize<R: Rng>(&self, first: char, confidence: f32, rng: &mut R) -> Vec<Alternative> {
        self.table
            .confusables(first)
            .iter()
            .filter(|&&c| c != first)
            .enumerate()
            .map(|(rank, &c)| {
                let penalty = match self.penalty {
                    AlternativePenalty::Random => {
                        BASE_PENALTY + rng.gen_range(0.0..RANDOM_PENALTY_SPAN)
                    }
                    AlternativePenalty::RankDecay => BASE_PENALTY * (rank as f32 + 1.0),
                };
                Alternative {
                    text: c.to_string(),
                    confidence: (confidence - penalty).max(0.0),
                }
            })
            .collect()
    }
}

/// Alternatives ranked by the engine itself
fn engine_alternatives(raw: &RawClassification, first: char) -> Vec<Alternative> {
    let primary = first.to_string();
    let mut seen: Vec<String> = Vec::new();
    raw.candidates
        .iter()
        .filter_map(|candidate| {
            let text = cleanup(&candidate.text);
            if text.is_empty() || text == primary || seen.contains(&text) {
                return None;
            }
            seen.push(text.clone());
            Some(Alternative {
                text,
                confidence: candidate.confidence.clamp(0.0, 100.0),
            })
        })
        .collect()
}
