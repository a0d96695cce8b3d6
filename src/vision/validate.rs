//! Acceptance check for recognition results

use super::charset::ExpectedCharacterClass;
use super::RecognitionResult;

/// Results below this confidence are treated as unrecognized
pub const DEFAULT_MIN_CONFIDENCE: f32 = 30.0;

/// Whether `result` is good enough to show as a recognized `expected` answer
pub fn validate(result: &RecognitionResult, expected: ExpectedCharacterClass) -> bool {
    validate_with_threshold(result, expected, DEFAULT_MIN_CONFIDENCE)
}

pub fn validate_with_threshold(
    result: &RecognitionResult,
    expected: ExpectedCharacterClass,
    min_confidence: f32,
) -> bool {
    if result.text.is_empty() || result.confidence < min_confidence {
        return false;
    }
    expected.matches(&result.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, confidence: f32) -> RecognitionResult {
        RecognitionResult {
            text: text.to_string(),
            confidence,
            alternatives: vec![],
        }
    }

    #[test]
    fn test_rejects_low_confidence() {
        for text in ["あ", "5", "", "漢字"] {
            assert!(!validate(&result(text, 29.9), ExpectedCharacterClass::Any));
        }
        assert!(validate(&result("あ", 30.0), ExpectedCharacterClass::Any));
    }

    #[test]
    fn test_rejects_empty_text() {
        assert!(!validate(&result("", 90.0), ExpectedCharacterClass::Any));
    }

    #[test]
    fn test_class_matching() {
        assert!(validate(&result("あ", 90.0), ExpectedCharacterClass::Hiragana));
        assert!(!validate(&result("ア", 90.0), ExpectedCharacterClass::Hiragana));
        assert!(validate(&result("ア", 90.0), ExpectedCharacterClass::Katakana));
        assert!(validate(&result("5", 90.0), ExpectedCharacterClass::Digit));
        assert!(!validate(&result("5あ", 90.0), ExpectedCharacterClass::Digit));
        assert!(validate(&result("日", 90.0), ExpectedCharacterClass::Any));
    }

    #[test]
    fn test_custom_threshold() {
        let r = result("あ", 45.0);
        assert!(!validate_with_threshold(&r, ExpectedCharacterClass::Hiragana, 50.0));
        assert!(validate_with_threshold(&r, ExpectedCharacterClass::Hiragana, 40.0));
    }
}
