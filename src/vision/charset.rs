//! Character classes, classifier parameter table and text cleanup

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character class the caller expects the drawing to belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedCharacterClass {
    Hiragana,
    Katakana,
    #[serde(alias = "number")]
    Digit,
    #[default]
    Any,
}

impl ExpectedCharacterClass {
    pub const ALL: [ExpectedCharacterClass; 4] = [
        ExpectedCharacterClass::Hiragana,
        ExpectedCharacterClass::Katakana,
        ExpectedCharacterClass::Digit,
        ExpectedCharacterClass::Any,
    ];

    /// Classifier parameters for this class
    pub fn parameters(&self) -> &'static ClassifierParameters {
        match self {
            ExpectedCharacterClass::Hiragana => &PARAMETER_TABLE[0],
            ExpectedCharacterClass::Katakana => &PARAMETER_TABLE[1],
            ExpectedCharacterClass::Digit => &PARAMETER_TABLE[2],
            ExpectedCharacterClass::Any => &PARAMETER_TABLE[3],
        }
    }

    /// Whether every character of `text` belongs to this class
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ExpectedCharacterClass::Hiragana => text.chars().all(is_hiragana),
            ExpectedCharacterClass::Katakana => text.chars().all(is_katakana),
            ExpectedCharacterClass::Digit => text.chars().all(|c| c.is_ascii_digit()),
            ExpectedCharacterClass::Any => true,
        }
    }
}

impl fmt::Display for ExpectedCharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpectedCharacterClass::Hiragana => "hiragana",
            ExpectedCharacterClass::Katakana => "katakana",
            ExpectedCharacterClass::Digit => "number",
            ExpectedCharacterClass::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown recognition type '{0}' (expected hiragana, katakana, number or any)")]
pub struct UnknownRecognitionType(String);

impl FromStr for ExpectedCharacterClass {
    type Err = UnknownRecognitionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hiragana" => Ok(ExpectedCharacterClass::Hiragana),
            "katakana" => Ok(ExpectedCharacterClass::Katakana),
            "number" | "digit" => Ok(ExpectedCharacterClass::Digit),
            "any" | "" => Ok(ExpectedCharacterClass::Any),
            _ => Err(UnknownRecognitionType(s.to_string())),
        }
    }
}

/// Symbol alphabet a classification call may choose from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharsetConstraint {
    /// Hiragana, katakana and digits
    General,
    /// Hiragana and katakana only
    Kana,
    /// Digits only (ASCII and full-width)
    Digits,
}

impl CharsetConstraint {
    pub fn allows(&self, c: char) -> bool {
        match self {
            CharsetConstraint::General => is_hiragana(c) || is_katakana(c) || is_digit(c),
            CharsetConstraint::Kana => is_hiragana(c) || is_katakana(c),
            CharsetConstraint::Digits => is_digit(c),
        }
    }

    /// Whether every character of a label is allowed
    pub fn allows_label(&self, label: &str) -> bool {
        !label.is_empty() && label.chars().all(|c| self.allows(c))
    }
}

/// How the engine should segment the drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segmentation {
    /// Exactly one glyph
    SingleChar,
    /// One line of glyphs
    SingleLine,
    /// Free-form block
    Block,
}

/// Per-call classifier settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierParameters {
    pub charset: CharsetConstraint,
    pub segmentation: Segmentation,
    /// Map full-width digits in the output to ASCII
    pub normalize_full_width_digits: bool,
}

static PARAMETER_TABLE: [ClassifierParameters; 4] = [
    // hiragana
    ClassifierParameters {
        charset: CharsetConstraint::Kana,
        segmentation: Segmentation::SingleChar,
        normalize_full_width_digits: false,
    },
    // katakana
    ClassifierParameters {
        charset: CharsetConstraint::Kana,
        segmentation: Segmentation::SingleChar,
        normalize_full_width_digits: false,
    },
    // number
    ClassifierParameters {
        charset: CharsetConstraint::Digits,
        segmentation: Segmentation::SingleLine,
        normalize_full_width_digits: true,
    },
    // any
    ClassifierParameters {
        charset: CharsetConstraint::General,
        segmentation: Segmentation::Block,
        normalize_full_width_digits: false,
    },
];

pub fn is_hiragana(c: char) -> bool {
    ('\u{3040}'..='\u{309F}').contains(&c)
}

pub fn is_katakana(c: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&c)
}

pub fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4E00}'..='\u{9FAF}').contains(&c)
}

pub fn is_full_width_digit(c: char) -> bool {
    ('\u{FF10}'..='\u{FF19}').contains(&c)
}

/// ASCII or full-width digit
pub fn is_digit(c: char) -> bool {
    c.is_ascii_digit() || is_full_width_digit(c)
}

/// Drop every character the pipeline does not recognize as glyph output
pub fn cleanup(text: &str) -> String {
    text.chars()
        .filter(|&c| is_hiragana(c) || is_katakana(c) || is_cjk_ideograph(c) || is_digit(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Replace full-width digits with their ASCII forms
pub fn to_half_width_digits(text: &str) -> String {
    text.chars()
        .map(|c| {
            if is_full_width_digit(c) {
                char::from_u32(c as u32 - 0xFF10 + '0' as u32).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}
