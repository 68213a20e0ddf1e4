//! Run both agents on each case and decide a winner.

use kbqa_agent::{GroundedAgent, PromptOnlyAgent, ToolCallRecord};
use serde::{Deserialize, Serialize};

use crate::cases::{
    reference_ground_truth, BenchmarkCase, GroundTruthStyle, DEFAULT_MAX_GROUND_TRUTH_FACTS,
};
use crate::judge::{judge_case, JudgeInput, JudgeRecord, JudgeWinner, PairwiseJudge};
use crate::scorer::{
    build_eval_context, evaluate_faithfulness, evaluate_response, EvalContextMode, ScoreError,
    Scorer, DEFAULT_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    #[serde(rename = "RAG")]
    Rag,
    #[serde(rename = "Prompt-Only")]
    PromptOnly,
    Tie,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rag => "RAG",
            Self::PromptOnly => "Prompt-Only",
            Self::Tie => "Tie",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSide {
    pub response: String,
    pub retrieved_context: String,
    pub score: f64,
    pub is_hallucination: bool,
    pub faithfulness_score: Option<f64>,
    pub faithfulness_is_hallucination: Option<bool>,
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptOnlySide {
    pub response: String,
    pub score: f64,
    pub is_hallucination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub question: String,
    pub description: String,
    pub ground_truth: String,
    pub evaluation_mode: EvalContextMode,
    pub rag: RagSide,
    pub prompt_only: PromptOnlySide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_judge: Option<JudgeRecord>,
}

impl ComparisonResult {
    /// A non-hallucinating side beats a hallucinating one; otherwise the
    /// higher score wins.
    pub fn winner(&self) -> Winner {
        decide_winner(
            (self.rag.score, self.rag.is_hallucination),
            (self.prompt_only.score, self.prompt_only.is_hallucination),
        )
    }

    /// Winner according to the pairwise judge, if one ran and answered.
    pub fn judge_winner(&self) -> Option<JudgeWinner> {
        self.llm_judge.as_ref().and_then(JudgeRecord::winner)
    }
}

pub fn decide_winner(rag: (f64, bool), prompt_only: (f64, bool)) -> Winner {
    match (rag.1, prompt_only.1) {
        (true, false) => Winner::PromptOnly,
        (false, true) => Winner::Rag,
        _ if rag.0 > prompt_only.0 => Winner::Rag,
        _ if prompt_only.0 > rag.0 => Winner::PromptOnly,
        _ => Winner::Tie,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub rag_hallucinations: usize,
    pub prompt_only_hallucinations: usize,
    pub rag_mean_score: f64,
    pub prompt_only_mean_score: f64,
    pub rag_wins: usize,
    pub prompt_only_wins: usize,
    pub ties: usize,
    /// Cases that had retrieved evidence to be faithful to.
    pub faithfulness_cases: usize,
    pub unfaithful: usize,
    pub mean_faithfulness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_judge: Option<JudgeSummary>,
}

/// Head-to-head counts from the pairwise judge over the judged cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeSummary {
    pub judge: String,
    pub judged: usize,
    pub rag_wins: usize,
    pub prompt_only_wins: usize,
    pub ties: usize,
    pub both_good: usize,
    pub both_bad: usize,
    pub errors: usize,
    pub rag_hallucinations: usize,
    pub prompt_only_hallucinations: usize,
}

impl JudgeSummary {
    /// `None` when no case carries a judge record.
    pub fn from_results(results: &[ComparisonResult]) -> Option<Self> {
        let records: Vec<&JudgeRecord> = results
            .iter()
            .filter_map(|r| r.llm_judge.as_ref())
            .collect();
        let first = records.first()?;
        let mut summary = JudgeSummary {
            judge: first.judge.clone(),
            judged: records.len(),
            ..JudgeSummary::default()
        };
        for record in &records {
            let Some(verdict) = &record.verdict else {
                summary.errors += 1;
                continue;
            };
            match verdict.winner {
                JudgeWinner::Rag => summary.rag_wins += 1,
                JudgeWinner::PromptOnly => summary.prompt_only_wins += 1,
                JudgeWinner::Tie => summary.ties += 1,
                JudgeWinner::BothGood => summary.both_good += 1,
                JudgeWinner::BothBad => summary.both_bad += 1,
            }
            summary.rag_hallucinations += usize::from(verdict.rag.has_hallucination);
            summary.prompt_only_hallucinations +=
                usize::from(verdict.prompt_only.has_hallucination);
        }
        Some(summary)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

impl Summary {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let winners: Vec<Winner> = results.iter().map(ComparisonResult::winner).collect();
        let faithfulness: Vec<(f64, bool)> = results
            .iter()
            .filter_map(|r| {
                r.rag
                    .faithfulness_score
                    .map(|s| (s, r.rag.faithfulness_is_hallucination.unwrap_or(false)))
            })
            .collect();

        Self {
            total: results.len(),
            rag_hallucinations: results.iter().filter(|r| r.rag.is_hallucination).count(),
            prompt_only_hallucinations: results
                .iter()
                .filter(|r| r.prompt_only.is_hallucination)
                .count(),
            rag_mean_score: mean(results.iter().map(|r| r.rag.score)).unwrap_or(0.0),
            prompt_only_mean_score: mean(results.iter().map(|r| r.prompt_only.score))
                .unwrap_or(0.0),
            rag_wins: winners.iter().filter(|w| **w == Winner::Rag).count(),
            prompt_only_wins: winners.iter().filter(|w| **w == Winner::PromptOnly).count(),
            ties: winners.iter().filter(|w| **w == Winner::Tie).count(),
            faithfulness_cases: faithfulness.len(),
            unfaithful: faithfulness.iter().filter(|(_, h)| *h).count(),
            mean_faithfulness: mean(faithfulness.iter().map(|(s, _)| *s)),
            llm_judge: JudgeSummary::from_results(results),
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkOptions {
    pub threshold: f64,
    pub mode: EvalContextMode,
    pub ground_truth_style: GroundTruthStyle,
    pub max_ground_truth_facts: usize,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            mode: EvalContextMode::GroundTruth,
            ground_truth_style: GroundTruthStyle::Concise,
            max_ground_truth_facts: DEFAULT_MAX_GROUND_TRUTH_FACTS,
        }
    }
}

pub struct ComparisonRunner<'a> {
    rag: &'a GroundedAgent,
    baseline: &'a PromptOnlyAgent,
    scorer: &'a dyn Scorer,
    judge: Option<&'a dyn PairwiseJudge>,
    options: BenchmarkOptions,
}

impl<'a> ComparisonRunner<'a> {
    pub fn new(
        rag: &'a GroundedAgent,
        baseline: &'a PromptOnlyAgent,
        scorer: &'a dyn Scorer,
    ) -> Self {
        Self {
            rag,
            baseline,
            scorer,
            judge: None,
            options: BenchmarkOptions::default(),
        }
    }

    /// Also ask `judge` for a side-by-side verdict on every case.
    pub fn with_judge(mut self, judge: &'a dyn PairwiseJudge) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_options(mut self, options: BenchmarkOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> BenchmarkOptions {
        self.options
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub fn run_case(&self, case: &BenchmarkCase) -> Result<ComparisonResult, ScoreError> {
        let opts = self.options;
        let reference = reference_ground_truth(
            case,
            opts.ground_truth_style,
            opts.max_ground_truth_facts,
        );

        let run = self.rag.answer(&case.question);
        let retrieved = run.retrieved_context();
        let evidence = run.sanitized_retrieved_context();
        let rag_eval = evaluate_response(
            self.scorer,
            &run.final_answer,
            &reference,
            &evidence,
            opts.mode,
            opts.threshold,
        )?;
        let faithfulness =
            evaluate_faithfulness(self.scorer, &run.final_answer, &evidence, opts.threshold)?;

        let baseline = self.baseline.answer(&case.question);
        let prompt_eval = evaluate_response(
            self.scorer,
            &baseline.answer,
            &reference,
            "",
            opts.mode,
            opts.threshold,
        )?;

        let llm_judge = self.judge.map(|judge| {
            judge_case(
                judge,
                &JudgeInput {
                    question: &case.question,
                    rag_response: &run.final_answer,
                    prompt_only_response: &baseline.answer,
                    reference_context: &build_eval_context(opts.mode, &reference, &evidence),
                },
            )
        });

        let result = ComparisonResult {
            question: case.question.clone(),
            description: case.description.clone(),
            ground_truth: reference,
            evaluation_mode: opts.mode,
            rag: RagSide {
                response: run.final_answer,
                retrieved_context: retrieved,
                score: rag_eval.score,
                is_hallucination: rag_eval.is_hallucination,
                faithfulness_score: faithfulness.map(|f| f.score),
                faithfulness_is_hallucination: faithfulness.map(|f| f.is_hallucination),
                tool_calls: run.tool_calls,
                error: run.error,
            },
            prompt_only: PromptOnlySide {
                response: baseline.answer,
                score: prompt_eval.score,
                is_hallucination: prompt_eval.is_hallucination,
                error: baseline.error,
            },
            llm_judge,
        };
        tracing::info!(
            question = %case.question,
            rag_score = result.rag.score,
            prompt_only_score = result.prompt_only.score,
            winner = %result.winner(),
            judge_winner = ?result.judge_winner(),
            "case scored"
        );
        Ok(result)
    }

    pub fn run_all(&self, cases: &[BenchmarkCase]) -> Result<Vec<ComparisonResult>, ScoreError> {
        cases.iter().map(|case| self.run_case(case)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hallucination_status_dominates_score() {
        assert_eq!(decide_winner((0.4, true), (0.3, false)), Winner::PromptOnly);
        assert_eq!(decide_winner((0.3, false), (0.9, true)), Winner::Rag);
    }

    #[test]
    fn score_breaks_equal_status() {
        assert_eq!(decide_winner((0.8, false), (0.6, false)), Winner::Rag);
        assert_eq!(decide_winner((0.1, true), (0.2, true)), Winner::PromptOnly);
        assert_eq!(decide_winner((0.7, false), (0.7, false)), Winner::Tie);
    }

    #[test]
    fn winner_serializes_with_display_names() {
        assert_eq!(serde_json::to_string(&Winner::Rag).unwrap(), "\"RAG\"");
        assert_eq!(serde_json::to_string(&Winner::PromptOnly).unwrap(), "\"Prompt-Only\"");
        assert_eq!(Winner::PromptOnly.to_string(), "Prompt-Only");
    }
}
