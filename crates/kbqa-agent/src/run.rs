//! The record of one question-answering run and its context views.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{OutcomeKind, SEARCH_ENTITY_CANDIDATES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub output: String,
    pub outcome: OutcomeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced final (non-chatter) content.
    Answered,
    StepLimit,
    /// Too many consecutive tool errors.
    ToolErrors,
    /// The model call itself failed.
    ModelError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub question: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Sanitized answer shown to the user; never empty.
    pub final_answer: String,
    /// Unsanitized candidate the answer was derived from, if any.
    pub raw_answer: Option<String>,
    pub steps: usize,
    pub stop_reason: StopReason,
    pub error: Option<String>,
}

impl Run {
    /// Every tool output, labeled `[Tool: name]`, separated by blank lines.
    pub fn retrieved_context(&self) -> String {
        self.tool_calls
            .iter()
            .map(|call| format!("[Tool: {}]\n{}", call.tool, call.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Tool outputs reduced to evidence, for faithfulness scoring.
    pub fn sanitized_retrieved_context(&self) -> String {
        self.tool_calls
            .iter()
            .filter_map(|call| {
                let cleaned = sanitize_tool_output(call);
                (!cleaned.is_empty()).then(|| format!("[Tool: {}]\n{cleaned}", call.tool))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tools_used(&self) -> Vec<&str> {
        self.tool_calls.iter().map(|c| c.tool.as_str()).collect()
    }
}

const INSTRUCTION_PREFIXES: &[&str] = &["NEXT STEP:", "INSTRUCTIONS:", "NOTE:"];

/// Drop what is not evidence: candidate lists (only the "no candidates"
/// sentinel survives), instruction echoes and protocol/argument errors.
pub fn sanitize_tool_output(call: &ToolCallRecord) -> String {
    if matches!(
        call.outcome,
        OutcomeKind::ProtocolViolation | OutcomeKind::InvalidArguments
    ) {
        return String::new();
    }
    if call.tool == SEARCH_ENTITY_CANDIDATES {
        return call
            .output
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("NO CANDIDATES FOUND"))
            .collect::<Vec<_>>()
            .join("\n");
    }
    call.output
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !INSTRUCTION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FETCH_ENTITY_PROPERTIES, WIKIDATA_SPARQL};
    use serde_json::json;

    fn record(tool: &str, output: &str, outcome: OutcomeKind) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.to_string(),
            arguments: json!({}),
            output: output.to_string(),
            outcome,
        }
    }

    fn run(calls: Vec<ToolCallRecord>) -> Run {
        Run {
            question: "q".into(),
            tool_calls: calls,
            final_answer: "a".into(),
            raw_answer: None,
            steps: 0,
            stop_reason: StopReason::Answered,
            error: None,
        }
    }

    #[test]
    fn retrieved_context_labels_every_output() {
        let r = run(vec![
            record(SEARCH_ENTITY_CANDIDATES, "CANDIDATES for 'France' (1 found):", OutcomeKind::Ok),
            record(FETCH_ENTITY_PROPERTIES, "Entity: France", OutcomeKind::Ok),
        ]);
        assert_eq!(
            r.retrieved_context(),
            "[Tool: search_entity_candidates]\nCANDIDATES for 'France' (1 found):\n\n[Tool: fetch_entity_properties]\nEntity: France"
        );
    }

    #[test]
    fn sanitized_context_keeps_evidence_only() {
        let r = run(vec![
            record(
                SEARCH_ENTITY_CANDIDATES,
                "CANDIDATES for 'Alan Turing' (1 found):\n\n1. [Q7251] Alan Turing - English computer scientist\n\nNEXT STEP: Call fetch_entity_properties ...",
                OutcomeKind::Ok,
            ),
            record(
                SEARCH_ENTITY_CANDIDATES,
                "NO CANDIDATES FOUND for 'Helena Vargass'. Entity cannot be verified.",
                OutcomeKind::NoData,
            ),
            record(
                FETCH_ENTITY_PROPERTIES,
                "Error: Tool-order protocol violation. QID 'Q1' was not returned ...",
                OutcomeKind::ProtocolViolation,
            ),
            record(
                FETCH_ENTITY_PROPERTIES,
                "Entity: Alan Turing\nQID: Q7251\n\nP108: employer - Government Code and Cypher School",
                OutcomeKind::Ok,
            ),
            record(WIKIDATA_SPARQL, "NOTE: capped\n{\"rows\": []}", OutcomeKind::Ok),
        ]);

        let ctx = r.sanitized_retrieved_context();
        assert!(!ctx.contains("CANDIDATES for"));
        assert!(!ctx.contains("NEXT STEP"));
        assert!(!ctx.contains("protocol violation"));
        assert!(ctx.contains("NO CANDIDATES FOUND for 'Helena Vargass'"));
        assert!(ctx.contains("P108: employer - Government Code and Cypher School"));
        assert!(ctx.contains("{\"rows\": []}"));
        assert!(!ctx.contains("NOTE:"));
    }
}
