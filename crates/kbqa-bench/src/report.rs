//! JSON and Markdown benchmark reports.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compare::{ComparisonResult, Summary, Winner};
use crate::judge::JudgeWinner;
use crate::scorer::EvalContextMode;
use crate::BenchError;

pub const RESULTS_FILE: &str = "benchmark_results.json";
pub const REPORT_FILE: &str = "benchmark_report.md";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    #[serde(flatten)]
    pub result: ComparisonResult,
    pub winner: Winner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_winner: Option<JudgeWinner>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub generated_at: DateTime<Utc>,
    pub scorer: String,
    pub evaluation_mode: EvalContextMode,
    pub threshold: f64,
    pub summary: Summary,
    pub cases: Vec<CaseReport>,
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let head: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

fn judge_label(case: &CaseReport) -> String {
    match (&case.judge_winner, &case.result.llm_judge) {
        (Some(w), _) => w.to_string(),
        (None, Some(_)) => "Error".to_string(),
        (None, None) => "N/A".to_string(),
    }
}

impl BenchmarkReport {
    pub fn new(
        results: Vec<ComparisonResult>,
        scorer: impl Into<String>,
        evaluation_mode: EvalContextMode,
        threshold: f64,
    ) -> Self {
        let summary = Summary::from_results(&results);
        let cases = results
            .into_iter()
            .map(|result| CaseReport {
                winner: result.winner(),
                judge_winner: result.judge_winner(),
                result,
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            scorer: scorer.into(),
            evaluation_mode,
            threshold,
            summary,
            cases,
        }
    }

    pub fn to_json(&self) -> Result<String, BenchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();

        let _ = writeln!(out, "# Grounded Agent vs Prompt-Only Benchmark\n");
        let _ = writeln!(
            out,
            "**Generated:** {}  ",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "**Scorer:** `{}`  ", self.scorer);
        let _ = writeln!(out, "**Evaluation Mode:** `{}`  ", self.evaluation_mode.as_str());
        let _ = writeln!(out, "**Threshold:** {:.2}\n", self.threshold);

        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "| Metric | Grounded | Prompt-Only |");
        let _ = writeln!(out, "|--------|----------|-------------|");
        let _ = writeln!(out, "| Total Tests | {} | {} |", s.total, s.total);
        let _ = writeln!(
            out,
            "| Factual Responses | {} | {} |",
            s.total - s.rag_hallucinations,
            s.total - s.prompt_only_hallucinations
        );
        let _ = writeln!(
            out,
            "| Hallucinations | {} | {} |",
            s.rag_hallucinations, s.prompt_only_hallucinations
        );
        let _ = writeln!(
            out,
            "| Hallucination Rate | {:.1}% | {:.1}% |",
            percent(s.rag_hallucinations, s.total),
            percent(s.prompt_only_hallucinations, s.total)
        );
        let _ = writeln!(
            out,
            "| Average Score | {:.3} | {:.3} |\n",
            s.rag_mean_score, s.prompt_only_mean_score
        );

        let _ = writeln!(out, "## Head-to-Head\n");
        let _ = writeln!(out, "| Winner | Count |");
        let _ = writeln!(out, "|--------|-------|");
        let _ = writeln!(out, "| Grounded | {} |", s.rag_wins);
        let _ = writeln!(out, "| Prompt-Only | {} |", s.prompt_only_wins);
        let _ = writeln!(out, "| Tie | {} |\n", s.ties);

        if let Some(judge) = &s.llm_judge {
            let _ = writeln!(out, "## LLM Judge Statistics (`{}`)\n", judge.judge);
            let _ = writeln!(out, "| Metric | Grounded | Prompt-Only |");
            let _ = writeln!(out, "|--------|----------|-------------|");
            let _ = writeln!(out, "| Cases Judged | {} | {} |", judge.judged, judge.judged);
            let _ = writeln!(
                out,
                "| Hallucinations Detected | {} | {} |",
                judge.rag_hallucinations, judge.prompt_only_hallucinations
            );
            let _ = writeln!(
                out,
                "| Hallucination Rate | {:.1}% | {:.1}% |\n",
                percent(judge.rag_hallucinations, judge.judged),
                percent(judge.prompt_only_hallucinations, judge.judged)
            );

            let _ = writeln!(out, "## Head-to-Head (LLM Judge)\n");
            let _ = writeln!(out, "| Verdict | Count |");
            let _ = writeln!(out, "|---------|-------|");
            let _ = writeln!(out, "| Grounded | {} |", judge.rag_wins);
            let _ = writeln!(out, "| Prompt-Only | {} |", judge.prompt_only_wins);
            let _ = writeln!(out, "| Tie | {} |", judge.ties);
            let _ = writeln!(out, "| Both Good | {} |", judge.both_good);
            let _ = writeln!(out, "| Both Bad | {} |", judge.both_bad);
            let _ = writeln!(out, "| Error | {} |\n", judge.errors);
        }

        if let Some(mean) = s.mean_faithfulness {
            let _ = writeln!(out, "## Retrieval Faithfulness\n");
            let _ = writeln!(out, "| Metric | Grounded |");
            let _ = writeln!(out, "|--------|----------|");
            let _ = writeln!(out, "| Cases with retrieval evidence | {} |", s.faithfulness_cases);
            let _ = writeln!(out, "| Non-faithful responses | {} |", s.unfaithful);
            let _ = writeln!(
                out,
                "| Non-faithful rate | {:.1}% |",
                percent(s.unfaithful, s.faithfulness_cases)
            );
            let _ = writeln!(out, "| Average faithfulness score | {mean:.3} |\n");
        }

        let judged = s.llm_judge.is_some();
        let _ = writeln!(out, "## Cases\n");
        if judged {
            let _ = writeln!(out, "| # | Question | Grounded | Prompt-Only | Winner | Judge |");
            let _ = writeln!(out, "|---|----------|----------|-------------|--------|-------|");
        } else {
            let _ = writeln!(out, "| # | Question | Grounded | Prompt-Only | Winner |");
            let _ = writeln!(out, "|---|----------|----------|-------------|--------|");
        }
        for (i, case) in self.cases.iter().enumerate() {
            let r = &case.result;
            let mark = |hallucinated: bool| if hallucinated { "❌" } else { "✅" };
            let _ = write!(
                out,
                "| {} | {} | {:.3} {} | {:.3} {} | {} |",
                i + 1,
                shorten(&r.question, 50),
                r.rag.score,
                mark(r.rag.is_hallucination),
                r.prompt_only.score,
                mark(r.prompt_only.is_hallucination),
                case.winner
            );
            if judged {
                let _ = write!(out, " {} |", judge_label(case));
            }
            let _ = writeln!(out);
        }

        for (i, case) in self.cases.iter().enumerate() {
            let r = &case.result;
            let _ = writeln!(out, "\n### {}. {}\n", i + 1, r.question);
            if !r.description.is_empty() {
                let _ = writeln!(out, "*{}*\n", r.description);
            }
            let _ = writeln!(out, "**Grounded:** {}\n", r.rag.response);
            let tools: Vec<&str> = r.rag.tool_calls.iter().map(|c| c.tool.as_str()).collect();
            if !tools.is_empty() {
                let _ = writeln!(out, "Tools: `{}`\n", tools.join("` → `"));
            }
            let _ = writeln!(out, "**Prompt-Only:** {}\n", r.prompt_only.response);
            let _ = writeln!(out, "**Winner:** {}", case.winner);
            if let Some(record) = &r.llm_judge {
                match (&record.verdict, &record.error) {
                    (Some(v), _) => {
                        let _ = writeln!(
                            out,
                            "\n**LLM Judge Verdict:** {} (Confidence: {})  ",
                            v.winner, v.confidence
                        );
                        let _ = writeln!(out, "**Reasoning:** {}\n", v.reasoning);
                        let yes_no = |h: bool| if h { "Yes" } else { "No" };
                        let _ = writeln!(
                            out,
                            "- Grounded hallucination: {} ({})",
                            yes_no(v.rag.has_hallucination),
                            v.rag.hallucination_details
                        );
                        let _ = writeln!(
                            out,
                            "- Prompt-Only hallucination: {} ({})",
                            yes_no(v.prompt_only.has_hallucination),
                            v.prompt_only.hallucination_details
                        );
                    }
                    (None, Some(e)) => {
                        let _ = writeln!(out, "\n**LLM Judge Error:** {e}");
                    }
                    (None, None) => {}
                }
            }
        }

        out
    }

    /// Write `benchmark_results.json` and `benchmark_report.md` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, PathBuf), BenchError> {
        std::fs::create_dir_all(dir)?;
        let json_path = dir.join(RESULTS_FILE);
        let md_path = dir.join(REPORT_FILE);
        std::fs::write(&json_path, self.to_json()?)?;
        std::fs::write(&md_path, self.render_markdown())?;
        Ok((json_path, md_path))
    }
}
