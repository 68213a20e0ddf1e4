//! Consistency scoring: how well a response is supported by a context.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("scorer backend error: {0}")]
    Backend(String),

    #[error("score out of range: {0}")]
    OutOfRange(f64),
}

/// Scores a `(context, response)` pair in `[0, 1]`; higher means better
/// supported. Implementations may be remote models; the harness only sees
/// this trait.
pub trait Scorer {
    fn name(&self) -> &str;

    fn score(&self, context: &str, response: &str) -> Result<f64, ScoreError>;
}

impl<T: Scorer + ?Sized> Scorer for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn score(&self, context: &str, response: &str) -> Result<f64, ScoreError> {
        (**self).score(context, response)
    }
}

// ============================================================================
// Lexical overlap
// ============================================================================

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "in", "on", "at", "to", "for", "by", "with",
    "from", "as", "is", "was", "were", "are", "be", "been", "being", "it", "its", "he", "she",
    "his", "her", "they", "their", "this", "that", "these", "those", "i", "which", "who", "whom",
    "what", "also", "not", "no", "did", "do", "does", "has", "have", "had", "there", "than",
    "then", "during", "while", "into", "about", "between", "such", "any", "can", "cannot",
    "verify", "unable", "determine",
];

/// Fraction of the response's content words that appear in the context.
///
/// Offline stand-in for a learned consistency model: a response that makes
/// no content claims scores 1.0, a response scored against an empty context
/// scores 0.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlapScorer;

fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl Scorer for LexicalOverlapScorer {
    fn name(&self) -> &str {
        "lexical-overlap"
    }

    fn score(&self, context: &str, response: &str) -> Result<f64, ScoreError> {
        let claimed = content_tokens(response);
        if claimed.is_empty() {
            return Ok(1.0);
        }
        let known: HashSet<String> = content_tokens(context).into_iter().collect();
        let supported = claimed.iter().filter(|t| known.contains(*t)).count();
        Ok(supported as f64 / claimed.len() as f64)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalContextMode {
    /// Score against the reference ground truth only.
    #[default]
    GroundTruth,
    /// Score against the reference plus the retrieved facts.
    Combined,
}

impl EvalContextMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ground_truth" => Some(Self::GroundTruth),
            "combined" => Some(Self::Combined),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GroundTruth => "ground_truth",
            Self::Combined => "combined",
        }
    }
}

pub fn build_eval_context(mode: EvalContextMode, ground_truth: &str, retrieved: &str) -> String {
    let ground_truth = ground_truth.trim();
    let retrieved = retrieved.trim();
    match mode {
        EvalContextMode::Combined if !retrieved.is_empty() => format!(
            "=== GROUND TRUTH ===\n{ground_truth}\n\n=== RETRIEVED FACTS ===\n{retrieved}\n"
        ),
        _ => ground_truth.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub is_hallucination: bool,
}

fn checked(score: f64, threshold: f64) -> Result<Evaluation, ScoreError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(ScoreError::OutOfRange(score));
    }
    Ok(Evaluation {
        score,
        is_hallucination: score < threshold,
    })
}

/// Score a response against the reference (and, in combined mode, the
/// retrieved facts). Scores below `threshold` count as hallucinations.
pub fn evaluate_response(
    scorer: &dyn Scorer,
    response: &str,
    ground_truth: &str,
    retrieved: &str,
    mode: EvalContextMode,
    threshold: f64,
) -> Result<Evaluation, ScoreError> {
    let context = build_eval_context(mode, ground_truth, retrieved);
    checked(scorer.score(&context, response)?, threshold)
}

/// Score a response against retrieved evidence only; `None` when there is
/// no evidence to be faithful to.
pub fn evaluate_faithfulness(
    scorer: &dyn Scorer,
    response: &str,
    evidence: &str,
    threshold: f64,
) -> Result<Option<Evaluation>, ScoreError> {
    if evidence.trim().is_empty() {
        return Ok(None);
    }
    checked(scorer.score(evidence, response)?, threshold).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn overlap_is_fraction_of_supported_words() {
        let s = LexicalOverlapScorer;
        let score = s
            .score("Paris is the capital of France.", "Paris is the capital of Spain.")
            .unwrap();
        // paris, capital, spain -> 2 of 3 supported
        assert_relative_eq!(score, 2.0 / 3.0);
        assert_relative_eq!(s.score("", "Paris is the capital.").unwrap(), 0.0);
        assert_relative_eq!(s.score("", "I cannot verify that.").unwrap(), 1.0);
    }

    #[test]
    fn combined_context_has_both_blocks() {
        let ctx = build_eval_context(EvalContextMode::Combined, " Paris. ", "[Tool: x]\nP36");
        assert_eq!(
            ctx,
            "=== GROUND TRUTH ===\nParis.\n\n=== RETRIEVED FACTS ===\n[Tool: x]\nP36\n"
        );
        assert_eq!(build_eval_context(EvalContextMode::Combined, "Paris.", "  "), "Paris.");
        assert_eq!(build_eval_context(EvalContextMode::GroundTruth, "Paris.", "P36"), "Paris.");
    }

    #[test]
    fn threshold_splits_hallucinations() {
        let s = LexicalOverlapScorer;
        let good = evaluate_response(
            &s,
            "Paris is the capital of France.",
            "Paris is the capital and largest city of France.",
            "",
            EvalContextMode::GroundTruth,
            DEFAULT_THRESHOLD,
        )
        .unwrap();
        assert!(!good.is_hallucination);

        let bad = evaluate_response(
            &s,
            "Lyon is the capital of Germany.",
            "Paris is the capital and largest city of France.",
            "",
            EvalContextMode::GroundTruth,
            DEFAULT_THRESHOLD,
        )
        .unwrap();
        assert!(bad.is_hallucination);
    }

    #[test]
    fn faithfulness_needs_evidence() {
        let s = LexicalOverlapScorer;
        assert_eq!(evaluate_faithfulness(&s, "Paris.", "   ", 0.5).unwrap(), None);
        let eval = evaluate_faithfulness(&s, "Paris.", "P36: capital — Paris", 0.5)
            .unwrap()
            .unwrap();
        assert_relative_eq!(eval.score, 1.0);
    }

    #[test]
    fn out_of_range_scores_are_errors() {
        struct Broken;
        impl Scorer for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn score(&self, _: &str, _: &str) -> Result<f64, ScoreError> {
                Ok(1.5)
            }
        }
        let err = evaluate_response(&Broken, "a", "b", "", EvalContextMode::GroundTruth, 0.5);
        assert!(matches!(err, Err(ScoreError::OutOfRange(_))));
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(EvalContextMode::parse("combined"), Some(EvalContextMode::Combined));
        assert_eq!(EvalContextMode::parse("ground-truth"), Some(EvalContextMode::GroundTruth));
        assert_eq!(EvalContextMode::parse("other"), None);
    }

    proptest::proptest! {
        #[test]
        fn lexical_scores_stay_in_unit_range(
            context in "[a-z ]{0,60}",
            response in "[a-z .]{0,60}",
        ) {
            let score = LexicalOverlapScorer.score(&context, &response).unwrap();
            proptest::prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
