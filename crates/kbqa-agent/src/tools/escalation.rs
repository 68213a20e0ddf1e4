//! Query escalation: validated, row-capped, read-only SELECT queries.

use std::sync::OnceLock;

use kbqa_graph::{Row, SparqlEndpoint};
use regex::Regex;
use serde_json::json;
use thiserror::Error;

use super::{EscalationArgs, ToolOutcome};
use crate::protocol::ProtocolState;

pub const DEFAULT_ROWS: usize = 25;
pub const HARD_ROW_CAP: usize = 100;

pub const NO_RESULTS: &str = "Query returned no results.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejection {
    #[error("Error: The SPARQL query is empty. Provide a read-only SELECT query.")]
    Empty,
    #[error(
        "Error: Mutation keyword '{keyword}' is not allowed. Only read-only SELECT queries can be run."
    )]
    Mutation { keyword: String },
    #[error(
        "Error: Only read-only SELECT queries are allowed (optionally preceded by PREFIX/BASE declarations)."
    )]
    NotSelect,
}

fn mutation_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(insert|delete|load|clear|create|drop|move|copy|add)\b").ok()
    })
    .as_ref()
}

fn select_prologue_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*(?:(?:#[^\n]*(?:\n|$))\s*|PREFIX\s+[A-Za-z0-9_.\-]*:\s*<[^>]*>\s*|BASE\s*<[^>]*>\s*)*SELECT\b",
        )
        .ok()
    })
    .as_ref()
}

/// Accept only `[PREFIX/BASE declarations] SELECT ...` with no mutation keyword
/// anywhere in the text. Runs before any network call.
pub fn validate_read_only_select(query: &str) -> Result<(), QueryRejection> {
    if query.trim().is_empty() {
        return Err(QueryRejection::Empty);
    }
    // A regex that fails to compile rejects everything.
    let (Some(mutation), Some(select)) = (mutation_re(), select_prologue_re()) else {
        return Err(QueryRejection::NotSelect);
    };
    if let Some(m) = mutation.find(query) {
        return Err(QueryRejection::Mutation {
            keyword: m.as_str().to_ascii_uppercase(),
        });
    }
    if !select.is_match(query) {
        return Err(QueryRejection::NotSelect);
    }
    Ok(())
}

/// `min(requested, HARD_ROW_CAP)`, never below one.
pub fn effective_row_limit(requested: Option<usize>, default_rows: usize) -> usize {
    requested.unwrap_or(default_rows).clamp(1, HARD_ROW_CAP)
}

pub fn render_rows(rows: &[Row], limit: usize) -> String {
    if rows.is_empty() {
        return NO_RESULTS.to_string();
    }
    let capped: Vec<&Row> = rows.iter().take(limit).collect();
    let payload = json!({ "rows": capped });
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
}

pub fn run_query_escalation(
    sparql: &dyn SparqlEndpoint,
    state: &mut ProtocolState,
    args: &EscalationArgs,
    default_rows: usize,
) -> ToolOutcome {
    if let Err(rejection) = validate_read_only_select(&args.sparql) {
        return ToolOutcome::invalid(rejection.to_string());
    }

    // Any validated attempt unlocks the article fallback, even if it fails.
    state.mark_escalation_attempt();

    let limit = effective_row_limit(args.max_rows, default_rows);
    match sparql.select(&args.sparql) {
        Ok(rows) if rows.is_empty() => ToolOutcome::no_data(NO_RESULTS),
        Ok(rows) => {
            tracing::debug!(rows = rows.len(), limit, "escalation query returned rows");
            ToolOutcome::ok(render_rows(&rows, limit))
        }
        Err(e) => {
            tracing::warn!(error = %e, "escalation query failed");
            ToolOutcome::upstream(format!("Error: SPARQL query failed: {e}"))
        }
    }
}
