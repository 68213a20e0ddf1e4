//! Last-resort article fallback, gated on a prior escalation attempt.

use kbqa_graph::documents::truncate_chars;
use kbqa_graph::{html_to_plain_text, DocumentSource, GraphResult, SparqlEndpoint};

use super::properties::check_literal_id;
use super::{ArticleArgs, ToolOutcome, WIKIDATA_SPARQL};
use crate::protocol::ProtocolState;

pub const DEFAULT_MAX_ARTICLE_CHARS: usize = 8000;
pub const TRUNCATION_MARKER: &str = "\n\n[Article truncated...]";

pub fn gate_message() -> String {
    format!(
        "Error: Tool-order protocol violation. Call {WIKIDATA_SPARQL}(sparql, max_rows) before \
         fetch_wikipedia_article when structured properties are insufficient."
    )
}

pub fn build_title_query(id: &str) -> String {
    format!(
        "PREFIX wd: <http://www.wikidata.org/entity/>\n\
         PREFIX schema: <http://schema.org/>\n\
         SELECT ?article WHERE {{\n  ?article schema:about wd:{id} ;\n           schema:isPartOf <https://en.wikipedia.org/> .\n}}\nLIMIT 1"
    )
}

/// `https://en.wikipedia.org/wiki/Albert_Einstein` -> `Albert_Einstein`.
pub fn article_title_from_url(url: &str) -> Option<String> {
    let (_, title) = url.split_once("/wiki/")?;
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn lookup_title(sparql: &dyn SparqlEndpoint, id: &str) -> GraphResult<Option<String>> {
    let rows = sparql.select(&build_title_query(id))?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("article"))
        .find_map(|url| article_title_from_url(url)))
}

/// Wrap article text in the fixed delimiters, truncating to `max_chars`.
pub fn render_article(entity_name: &str, id: &str, text: &str, max_chars: usize) -> String {
    let (head, truncated) = truncate_chars(text, max_chars);
    let marker = if truncated { TRUNCATION_MARKER } else { "" };
    format!(
        "=== Wikipedia Article: {entity_name} ({id}) ===\n\n{head}{marker}\n\n=== END OF ARTICLE ==="
    )
}

pub fn fetch_article(
    sparql: &dyn SparqlEndpoint,
    documents: &dyn DocumentSource,
    state: &mut ProtocolState,
    args: &ArticleArgs,
    max_chars: usize,
) -> ToolOutcome {
    if !state.has_escalation_attempt() {
        return ToolOutcome::violation(gate_message());
    }
    let id = match check_literal_id(&args.qid) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    let entity_name = args
        .entity_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| state.origin_of(&id))
        .unwrap_or(id.as_str())
        .to_string();

    let title = match lookup_title(sparql, &id) {
        Ok(Some(title)) => title,
        Ok(None) => {
            return ToolOutcome::no_data(format!(
                "No Wikipedia article found for {id} ({entity_name})."
            ))
        }
        Err(e) => {
            tracing::warn!(qid = %id, error = %e, "article title lookup failed");
            return ToolOutcome::upstream(format!(
                "Could not look up the Wikipedia article for {entity_name} ({id}) right now."
            ));
        }
    };

    let text = match documents.fetch_html(&title) {
        Ok(html) => html_to_plain_text(&html),
        Err(e) => {
            tracing::warn!(qid = %id, title = %title, error = %e, "article fetch failed");
            return ToolOutcome::upstream(format!(
                "Could not fetch the Wikipedia article for {entity_name}."
            ));
        }
    };
    if text.trim().is_empty() {
        return ToolOutcome::no_data(format!(
            "The Wikipedia article for {entity_name} ({id}) has no readable text."
        ));
    }

    ToolOutcome::ok(render_article(&entity_name, &id, &text, max_chars))
}
