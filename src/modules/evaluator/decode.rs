use tracing::warn;

use super::types::{EvaluationIntent, EvaluationResult};

pub const EMPTY_TEXT_SENTINEL: &str = "No content to summarize.";

const MIN_SCORE: f64 = 0.0;
const MAX_SCORE: f64 = 10.0;

/// Never fails; malformed output degrades to the intent's default.
pub fn decode(intent: EvaluationIntent, raw: &str) -> EvaluationResult {
    match intent {
        EvaluationIntent::Score => EvaluationResult::Score(decode_score(raw)),
        EvaluationIntent::Suggestions
        | EvaluationIntent::LearningPath
        | EvaluationIntent::PortfolioSummary => EvaluationResult::Text(decode_text(raw)),
    }
}

/// Keeps only ASCII digits and dots, parses what remains and clamps to `[0, 10]`.
/// Multi-number replies collapse: "8 out of 10" filters to "810" and clamps to 10.
pub fn decode_score(raw: &str) -> f64 {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match filtered.parse::<f64>() {
        Ok(value) => value.clamp(MIN_SCORE, MAX_SCORE),
        Err(_) => {
            warn!(raw = %raw.chars().take(80).collect::<String>(), "score output not numeric, using 0");
            MIN_SCORE
        }
    }
}

pub fn decode_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        warn!("model returned empty text");
        EMPTY_TEXT_SENTINEL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_clamps_scores() {
        assert_eq!(decode_score("7"), 7.0);
        assert_eq!(decode_score("Score: 8.5"), 8.5);
        assert_eq!(decode_score("8 out of 10"), 10.0);
        assert_eq!(decode_score("99"), 10.0);
        assert_eq!(decode_score("-3"), 3.0);
        assert_eq!(decode_score(".5"), 0.5);
    }

    #[test]
    fn overflowing_digit_runs_clamp_to_max() {
        assert_eq!(decode_score(&"9".repeat(400)), 10.0);
        assert_eq!(decode_score(&format!("Score: {}", "1".repeat(320))), 10.0);
    }

    #[test]
    fn inputs_without_digits_decode_to_zero() {
        for raw in ["", "excellent", "N/A", ".", "..", "7.5.1"] {
            assert_eq!(decode_score(raw), 0.0, "input {raw:?}");
        }
    }

    #[test]
    fn score_decoding_is_stable_and_bounded() {
        for raw in ["0", "3.25", "10", "1234", "score 6.", "abc", "4 stars", "9.99999"] {
            let first = decode_score(raw);
            assert!((0.0..=10.0).contains(&first), "input {raw:?}");
            assert_eq!(decode_score(&first.to_string()), first, "input {raw:?}");
        }
    }

    #[test]
    fn text_is_trimmed_or_replaced() {
        assert_eq!(decode_text("  add tests\n"), "add tests");
        assert_eq!(decode_text(" \n\t "), EMPTY_TEXT_SENTINEL);
    }

    #[test]
    fn decode_dispatches_on_intent() {
        assert_eq!(
            decode(EvaluationIntent::Score, "6"),
            EvaluationResult::Score(6.0)
        );
        assert_eq!(
            decode(EvaluationIntent::LearningPath, ""),
            EvaluationResult::Text(EMPTY_TEXT_SENTINEL.to_string())
        );
    }
}
