//! Pairwise LLM judge: a second evaluator that reads both answers side by
//! side and names the one that hallucinated less.
//!
//! Unlike a [`Scorer`](crate::Scorer), the judge sees the grounded and the
//! prompt-only response together, so its verdict can be `Both-Good` or
//! `Both-Bad` as well as a winner. A judge failure never aborts a benchmark;
//! it is recorded on the case and counted as an error.

use kbqa_agent::{ChatMessage, ChatModel, ChatRequest, ModelTurn};
use serde::{Deserialize, Serialize};

use crate::scorer::ScoreError;

pub const JUDGE_SYSTEM_PROMPT: &str = "\
You are an expert fact-checker evaluating two AI responses for factual accuracy using YOUR OWN KNOWLEDGE.

HALLUCINATION DEFINITION:
- States false facts as true
- Invents entities, events, or relationships
- Attributes incorrect dates/numbers/details to real entities
- Fabricates collaborations or connections

NOT HALLUCINATION:
- Stating \"I don't know\" or \"I cannot verify\" for unknown entities
- Refusing to answer about fictional entities
- Admitting appropriate uncertainty

YOUR TASK:
Verify facts using a blend of the PROVIDED REFERENCE CONTEXT and YOUR KNOWLEDGE.
Factual claims in the responses should be cross-referenced against the context when available.

Hallucination priorities:
1. Contradictions to the provided Reference Context.
2. Fabrications of details not mentioned in current context but stated as fact.
3. Appropriate refusal for unknown/fictional entities.
4. Scope discipline: extra details beyond the question are risky (potential hallucination).

You will evaluate: RAG Response vs Prompt-Only Response.";

const RESPONSE_FORMAT: &str = r#"Respond with JSON in this format:
```json
{
    "winner": "<RAG|Prompt-Only|Tie|Both-Bad|Both-Good>",
    "confidence": "<High|Medium|Low>",
    "rag_evaluation": {
        "has_hallucination": <true|false>,
        "hallucination_details": "<specific issues or 'None detected'>",
        "strengths": "<what this response did well>"
    },
    "prompt_evaluation": {
        "has_hallucination": <true|false>,
        "hallucination_details": "<specific issues or 'None detected'>",
        "strengths": "<what this response did well>"
    },
    "reasoning": "<2-3 sentence explanation>"
}
```

Note: Stating "I cannot verify" for fictional entities is CORRECT, not a failure."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JudgeWinner {
    #[serde(rename = "RAG", alias = "rag", alias = "Rag")]
    Rag,
    #[serde(rename = "Prompt-Only", alias = "prompt-only", alias = "Prompt-only")]
    PromptOnly,
    #[serde(alias = "tie")]
    Tie,
    #[serde(rename = "Both-Bad", alias = "both-bad")]
    BothBad,
    #[serde(rename = "Both-Good", alias = "both-good")]
    BothGood,
}

impl std::fmt::Display for JudgeWinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rag => "RAG",
            Self::PromptOnly => "Prompt-Only",
            Self::Tie => "Tie",
            Self::BothBad => "Both-Bad",
            Self::BothGood => "Both-Good",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideAssessment {
    pub has_hallucination: bool,
    pub hallucination_details: String,
    pub strengths: String,
}

/// The judge's structured answer, in the JSON shape it is asked to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub winner: JudgeWinner,
    #[serde(default)]
    pub confidence: String,
    #[serde(default, rename = "rag_evaluation")]
    pub rag: SideAssessment,
    #[serde(default, rename = "prompt_evaluation")]
    pub prompt_only: SideAssessment,
    #[serde(default)]
    pub reasoning: String,
}

/// Verdict or failure for one case; exactly one of the two is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub judge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<JudgeVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JudgeRecord {
    pub fn winner(&self) -> Option<JudgeWinner> {
        self.verdict.as_ref().map(|v| v.winner)
    }
}

pub struct JudgeInput<'a> {
    pub question: &'a str,
    pub rag_response: &'a str,
    pub prompt_only_response: &'a str,
    /// Reference facts the judge cross-checks against; may be empty.
    pub reference_context: &'a str,
}

/// Compares a grounded and a prompt-only response to the same question.
pub trait PairwiseJudge {
    fn name(&self) -> &str;

    fn judge(&self, input: &JudgeInput<'_>) -> Result<JudgeVerdict, ScoreError>;
}

impl<T: PairwiseJudge + ?Sized> PairwiseJudge for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn judge(&self, input: &JudgeInput<'_>) -> Result<JudgeVerdict, ScoreError> {
        (**self).judge(input)
    }
}

pub fn build_judge_prompt(input: &JudgeInput<'_>) -> String {
    let mut prompt = String::new();
    let reference = input.reference_context.trim();
    if !reference.is_empty() {
        prompt.push_str("## REFERENCE CONTEXT (Ground Truth / Retrieved Facts)\n");
        prompt.push_str(reference);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "## QUESTION\n{}\n\n\
         ## RAG RESPONSE (Uses Wikidata Knowledge Retrieval)\n{}\n\n\
         ## PROMPT-ONLY RESPONSE (No External Knowledge)\n{}\n\n\
         ## YOUR TASK\n\n\
         Analyze both responses for:\n\
         1. Cross-referencing: Do they accurately reflect the provided REFERENCE CONTEXT?\n\
         2. Fictional entity detection: (good responses state \"cannot verify\", not invent details)\n\
         3. Fact verification: dates, places, accomplishments\n\
         4. Fabrication: Penalize unsupported extra claims as hallucinations.\n\n",
        input.question.trim(),
        input.rag_response.trim(),
        input.prompt_only_response.trim(),
    ));
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// First balanced `{...}` object in `text`, skipping braces inside strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + idx]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the judge's reply, tolerating code fences and surrounding prose.
pub fn parse_judge_response(raw: &str) -> Result<JudgeVerdict, ScoreError> {
    let trimmed = raw.trim();
    if let Ok(verdict) = serde_json::from_str(trimmed) {
        return Ok(verdict);
    }
    let candidate = first_json_object(trimmed)
        .ok_or_else(|| ScoreError::Backend("judge did not return a JSON object".to_string()))?;
    serde_json::from_str(candidate)
        .map_err(|e| ScoreError::Backend(format!("judge returned an unusable verdict: {e}")))
}

/// [`PairwiseJudge`] backed by any chat model.
pub struct LlmJudge {
    model: Box<dyn ChatModel>,
}

impl LlmJudge {
    pub fn new(model: Box<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl PairwiseJudge for LlmJudge {
    fn name(&self) -> &str {
        "llm-judge"
    }

    fn judge(&self, input: &JudgeInput<'_>) -> Result<JudgeVerdict, ScoreError> {
        let messages = [ChatMessage::User {
            content: build_judge_prompt(input),
        }];
        let request = ChatRequest {
            system: JUDGE_SYSTEM_PROMPT,
            messages: &messages,
            tools: &[],
        };
        let text = match self.model.chat(&request) {
            Ok(ModelTurn::Text { text }) | Ok(ModelTurn::ToolCalls { text, .. }) => text,
            Err(e) => return Err(ScoreError::Backend(format!("judge model failed: {e}"))),
        };
        parse_judge_response(&text)
    }
}

/// Run the judge and keep either its verdict or its error.
pub fn judge_case(judge: &dyn PairwiseJudge, input: &JudgeInput<'_>) -> JudgeRecord {
    match judge.judge(input) {
        Ok(verdict) => JudgeRecord {
            judge: judge.name().to_string(),
            verdict: Some(verdict),
            error: None,
        },
        Err(e) => {
            tracing::warn!(judge = judge.name(), error = %e, "judge failed");
            JudgeRecord {
                judge: judge.name().to_string(),
                verdict: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbqa_agent::ScriptedModel;

    const VERDICT: &str = r#"{
        "winner": "RAG",
        "confidence": "High",
        "rag_evaluation": {"has_hallucination": false, "hallucination_details": "None detected", "strengths": "Refused"},
        "prompt_evaluation": {"has_hallucination": true, "hallucination_details": "Invented a lab {in Lisbon}", "strengths": ""},
        "reasoning": "The baseline fabricated a collaboration."
    }"#;

    fn input<'a>() -> JudgeInput<'a> {
        JudgeInput {
            question: "Who is Liora Anstrum?",
            rag_response: "I cannot verify that.",
            prompt_only_response: "A marine roboticist from Lisbon.",
            reference_context: "",
        }
    }

    #[test]
    fn fenced_verdict_is_parsed() {
        let raw = format!("Here is my evaluation:\n```json\n{VERDICT}\n```\nDone.");
        let verdict = parse_judge_response(&raw).unwrap();
        assert_eq!(verdict.winner, JudgeWinner::Rag);
        assert_eq!(verdict.confidence, "High");
        assert!(verdict.prompt_only.has_hallucination);
        assert_eq!(verdict.prompt_only.hallucination_details, "Invented a lab {in Lisbon}");
        assert!(!verdict.rag.has_hallucination);
    }

    #[test]
    fn sparse_verdicts_default_missing_fields() {
        let verdict = parse_judge_response(r#"{"winner": "Both-Good"}"#).unwrap();
        assert_eq!(verdict.winner, JudgeWinner::BothGood);
        assert_eq!(verdict.rag, SideAssessment::default());
        assert!(verdict.reasoning.is_empty());
    }

    #[test]
    fn unknown_winner_or_prose_is_an_error() {
        assert!(matches!(
            parse_judge_response("RAG is better."),
            Err(ScoreError::Backend(_))
        ));
        assert!(parse_judge_response(r#"{"winner": "Error"}"#).is_err());
    }

    #[test]
    fn prompt_includes_reference_only_when_present() {
        let without = build_judge_prompt(&input());
        assert!(without.starts_with("## QUESTION\nWho is Liora Anstrum?"));
        assert!(without.contains("## PROMPT-ONLY RESPONSE (No External Knowledge)\nA marine roboticist"));
        assert!(without.contains("\"winner\": \"<RAG|Prompt-Only|Tie|Both-Bad|Both-Good>\""));

        let with = build_judge_prompt(&JudgeInput {
            reference_context: "No such person exists.",
            ..input()
        });
        assert!(with.starts_with("## REFERENCE CONTEXT (Ground Truth / Retrieved Facts)\nNo such person"));
    }

    #[test]
    fn llm_judge_reads_the_model_reply() {
        let model = ScriptedModel::new(vec![ModelTurn::text(VERDICT)]);
        let judge = LlmJudge::new(Box::new(model));
        let verdict = judge.judge(&input()).unwrap();
        assert_eq!(verdict.winner, JudgeWinner::Rag);
        assert_eq!(verdict.reasoning, "The baseline fabricated a collaboration.");
    }

    #[test]
    fn failed_judge_is_recorded_not_raised() {
        let judge = LlmJudge::new(Box::new(ScriptedModel::new(Vec::new())));
        let record = judge_case(&judge, &input());
        assert_eq!(record.judge, "llm-judge");
        assert_eq!(record.winner(), None);
        assert!(record.error.unwrap().contains("judge model failed"));
    }

    #[test]
    fn winner_names_round_trip_display() {
        for winner in [
            JudgeWinner::Rag,
            JudgeWinner::PromptOnly,
            JudgeWinner::Tie,
            JudgeWinner::BothBad,
            JudgeWinner::BothGood,
        ] {
            let json = serde_json::to_string(&winner).unwrap();
            assert_eq!(json, format!("\"{winner}\""));
        }
    }
}
