//! # kbqa-bench
//!
//! Runs the grounded agent and the prompt-only baseline on the same
//! questions, scores both against a reference through an opaque
//! [`Scorer`], and reports who hallucinated less. An optional
//! [`PairwiseJudge`] adds a second, side-by-side verdict per case.
//!
//! ```text
//! BenchmarkCase ─▶ GroundedAgent ──▶ Run ──┐
//!              └─▶ PromptOnlyAgent ──────┐ │
//!                                        ▼ ▼
//!                      Scorer(reference [+ retrieved facts], response)
//!                                        │
//!                     ComparisonResult ─▶ Summary ─▶ BenchmarkReport (JSON + Markdown)
//! ```

pub mod cases;
pub mod compare;
pub mod judge;
pub mod report;
pub mod scorer;

use thiserror::Error;

pub use cases::{default_cases, reference_ground_truth, BenchmarkCase, GroundTruthStyle};
pub use compare::{
    BenchmarkOptions, ComparisonResult, ComparisonRunner, JudgeSummary, Summary, Winner,
};
pub use judge::{JudgeRecord, JudgeVerdict, JudgeWinner, LlmJudge, PairwiseJudge};
pub use report::BenchmarkReport;
pub use scorer::{
    evaluate_faithfulness, evaluate_response, EvalContextMode, Evaluation, LexicalOverlapScorer,
    ScoreError, Scorer,
};

#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid case file: {0}")]
    Cases(String),
}

/// Load cases from a JSON array of `{question, ground_truth, ...}` objects.
pub fn load_cases(text: &str) -> Result<Vec<BenchmarkCase>, BenchError> {
    let cases: Vec<BenchmarkCase> = serde_json::from_str(text)?;
    if cases.is_empty() {
        return Err(BenchError::Cases("no cases".to_string()));
    }
    if let Some(i) = cases.iter().position(|c| c.question.trim().is_empty()) {
        return Err(BenchError::Cases(format!("case {} has an empty question", i + 1)));
    }
    Ok(cases)
}

/// Run every case and assemble the report.
pub fn run_benchmark(
    runner: &ComparisonRunner<'_>,
    cases: &[BenchmarkCase],
) -> Result<BenchmarkReport, BenchError> {
    let results = runner.run_all(cases)?;
    let options = runner.options();
    Ok(BenchmarkReport::new(
        results,
        runner.scorer_name(),
        options.mode,
        options.threshold,
    ))
}
