//! Integration tests for the complete kbqa pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! 1. Mock script (JSON) → ScriptedModel → GroundedAgent → Run
//! 2. Run → sanitized evidence → Scorer
//! 3. ComparisonRunner → BenchmarkReport → files on disk
//!
//! Run with: cargo test --test integration_tests

use kbqa_agent::{
    GroundedAgent, OutcomeKind, PromptOnlyAgent, ScriptedModel, StopReason, Toolkit, REFUSAL,
};
use kbqa_bench::report::{REPORT_FILE, RESULTS_FILE};
use kbqa_bench::{
    run_benchmark, BenchmarkCase, BenchmarkOptions, BenchmarkReport, ComparisonRunner,
    EvalContextMode, LexicalOverlapScorer, Winner,
};
use kbqa_graph::{FnEndpoint, GraphResult, Row, StaticDocuments};
use tempfile::tempdir;

// ============================================================================
// Fixtures
// ============================================================================

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// France (Q142) with its capital; every other lookup comes back empty.
fn france_toolkit() -> Toolkit {
    let endpoint = FnEndpoint::new(|query: &str| -> GraphResult<Vec<Row>> {
        if query.contains("EntitySearch") && query.contains("France") {
            return Ok(vec![row(&[
                ("item", "http://www.wikidata.org/entity/Q142"),
                ("itemLabel", "France"),
                ("itemDescription", "country in Western Europe"),
                ("instanceOfLabel", "sovereign state"),
            ])]);
        }
        if query.contains("BIND(wd:Q142") {
            return Ok(vec![row(&[
                ("itemLabel", "France"),
                ("itemDescription", "country in Western Europe"),
                ("p36ValueLabel", "Paris"),
            ])]);
        }
        Ok(Vec::new())
    });
    Toolkit::new(Box::new(endpoint), Box::new(StaticDocuments::new()))
}

const CAPITAL_SCRIPT: &str = r#"[
    {"type": "tool_calls", "calls": [
        {"name": "search_entity_candidates",
         "arguments": {"entity_name": "France", "entity_type": "country"}}
    ]},
    {"type": "tool_calls", "calls": [
        {"name": "fetch_entity_properties",
         "arguments": {"qid": "Q142", "properties": ["P36"]}}
    ]},
    {"type": "text", "text": "Based on the search results, the capital of France is Paris."}
]"#;

fn capital_case() -> BenchmarkCase {
    BenchmarkCase::new(
        "What is the capital of France?",
        "Paris is the capital of France.",
    )
    .with_description("Simple geographic fact")
}

// ============================================================================
// Agent pipeline
// ============================================================================

#[test]
fn test_mock_script_drives_grounded_run() {
    let model = ScriptedModel::from_json(CAPITAL_SCRIPT).expect("valid script");
    let agent = GroundedAgent::new(Box::new(model), france_toolkit());

    let run = agent.answer("What is the capital of France?");

    assert_eq!(run.stop_reason, StopReason::Answered);
    assert_eq!(run.final_answer, "The capital of France is Paris.");
    assert_eq!(
        run.tools_used(),
        vec!["search_entity_candidates", "fetch_entity_properties"]
    );
    assert!(run.tool_calls.iter().all(|c| c.outcome == OutcomeKind::Ok));
    assert!(run.sanitized_retrieved_context().contains("Paris"));
    assert!(run.error.is_none());
}

#[test]
fn test_run_serializes_for_the_cli() {
    let model = ScriptedModel::from_json(CAPITAL_SCRIPT).expect("valid script");
    let run = GroundedAgent::new(Box::new(model), france_toolkit())
        .answer("What is the capital of France?");

    let value = serde_json::to_value(&run).unwrap();
    assert_eq!(value["stop_reason"], "answered");
    assert_eq!(value["tool_calls"][0]["tool"], "search_entity_candidates");
    assert_eq!(value["tool_calls"][1]["arguments"]["qid"], "Q142");
}

#[test]
fn test_invalid_mock_script_is_a_config_error() {
    let err = ScriptedModel::from_json(r#"[{"type": "speech"}]"#).unwrap_err();
    assert!(err.to_string().contains("invalid mock script"));
}

#[test]
fn test_exhausted_script_refuses() {
    let agent = GroundedAgent::new(
        Box::new(ScriptedModel::from_json("[]").unwrap()),
        france_toolkit(),
    );
    let run = agent.answer("What is the capital of France?");
    assert_eq!(run.stop_reason, StopReason::ModelError);
    assert_eq!(run.final_answer, REFUSAL);
    assert!(run.error.is_some());
}

// ============================================================================
// Benchmark pipeline
// ============================================================================

#[test]
fn test_benchmark_writes_json_and_markdown() {
    let rag = GroundedAgent::new(
        Box::new(ScriptedModel::from_json(CAPITAL_SCRIPT).unwrap()),
        france_toolkit(),
    );
    let baseline = PromptOnlyAgent::new(Box::new(
        ScriptedModel::from_json(r#"[{"type": "text", "text": "Lyon has served as the French seat since 1871."}]"#)
            .unwrap(),
    ));
    let scorer = LexicalOverlapScorer;
    let runner = ComparisonRunner::new(&rag, &baseline, &scorer).with_options(BenchmarkOptions {
        mode: EvalContextMode::Combined,
        ..BenchmarkOptions::default()
    });

    let report = run_benchmark(&runner, &[capital_case()]).unwrap();
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.cases[0].winner, Winner::Rag);
    assert!(!report.cases[0].result.rag.is_hallucination);
    assert!(report.cases[0].result.prompt_only.is_hallucination);
    assert_eq!(report.summary.faithfulness_cases, 1);

    let dir = tempdir().unwrap();
    let (json_path, md_path) = report.save(dir.path()).unwrap();
    assert_eq!(json_path, dir.path().join(RESULTS_FILE));
    assert_eq!(md_path, dir.path().join(REPORT_FILE));

    let reloaded: BenchmarkReport =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(reloaded.summary, report.summary);
    assert_eq!(reloaded.cases[0].result.question, "What is the capital of France?");

    let markdown = std::fs::read_to_string(&md_path).unwrap();
    assert!(markdown.contains("# Grounded Agent vs Prompt-Only Benchmark"));
    assert!(markdown.contains("**Evaluation Mode:** `combined`"));
    assert!(markdown.contains("Tools: `search_entity_candidates` → `fetch_entity_properties`"));
}
