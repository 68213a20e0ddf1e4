//! Guarded, batched property fetch for one authorized entity.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use kbqa_graph::catalog::{self, TEMPORAL_QUALIFIERS};
use kbqa_graph::sparql::entity_id_from_uri;
use kbqa_graph::{Row, SparqlEndpoint};
use serde::Serialize;

use super::{PropertyArgs, ToolOutcome, SEARCH_ENTITY_CANDIDATES};
use crate::protocol::{normalize_entity_id, ProtocolState, AUTHORIZED_SAMPLE_LIMIT};

pub const MAX_VALUES_PER_PROPERTY: usize = 5;
pub const RESULT_ROW_LIMIT: usize = 500;
const ENTITY_URI_PREFIX: &str = "http://www.wikidata.org/entity/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyValue {
    pub value: String,
    /// Qualifier code (`P580`, `P582`, `P585`) -> value.
    pub qualifiers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyRecord {
    pub code: String,
    pub label: String,
    pub values: Vec<PropertyValue>,
}

/// Validate a model-supplied id as a literal `Q<digits>`.
///
/// Code-like input (e.g. `search_entity_candidates(...)[0]["qid"]`) gets a
/// dedicated message so the model stops emitting expressions.
pub fn check_literal_id(raw: &str) -> Result<String, ToolOutcome> {
    if let Some(id) = normalize_entity_id(raw) {
        return Ok(id);
    }
    if looks_like_expression(raw) {
        return Err(ToolOutcome::invalid(format!(
            "Error: Pass one literal QID such as 'Q142', not code or an expression \
             (got '{}'). Copy a QID exactly as listed by {SEARCH_ENTITY_CANDIDATES}.",
            raw.trim()
        )));
    }
    Err(ToolOutcome::invalid(format!(
        "Error: Invalid QID '{}'. Must be 'Q' followed by digits (e.g., 'Q142').",
        raw.trim()
    )))
}

fn looks_like_expression(raw: &str) -> bool {
    raw.chars().any(|c| matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '=' | '"'))
}

fn unauthorized_message(id: &str, state: &ProtocolState) -> String {
    let sample = state.authorized_sample(AUTHORIZED_SAMPLE_LIMIT);
    let authorized = if sample.is_empty() {
        "none yet".to_string()
    } else {
        sample.join(", ")
    };
    format!(
        "Error: Tool-order protocol violation. QID '{id}' was not returned by \
         {SEARCH_ENTITY_CANDIDATES} in this conversation. Call {SEARCH_ENTITY_CANDIDATES} \
         first, then pass one of the QIDs it lists. Authorized QIDs so far: {authorized}."
    )
}

/// Normalized, catalogued, de-duplicated codes in request order.
pub fn valid_properties(requested: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in requested {
        let code = catalog::normalize_code(raw);
        if catalog::is_known_property(&code) && !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

fn var_prefix(code: &str) -> String {
    code.to_ascii_lowercase()
}

/// One query for all requested properties: statement value, optional
/// temporal qualifiers, subject label/description and article link.
pub fn build_property_query(id: &str, properties: &[String], include_qualifiers: bool) -> String {
    let mut select = String::from("?itemLabel ?itemDescription ?article");
    let mut body = String::new();

    for code in properties {
        let v = var_prefix(code);
        let _ = write!(select, " ?{v}Value ?{v}ValueLabel");
        let _ = write!(
            body,
            "  OPTIONAL {{\n    ?item p:{code} ?{v}Statement .\n    ?{v}Statement ps:{code} ?{v}Value .\n"
        );
        if include_qualifiers {
            for (qualifier, _) in TEMPORAL_QUALIFIERS {
                let _ = write!(select, " ?{v}{qualifier}");
                let _ = writeln!(
                    body,
                    "    OPTIONAL {{ ?{v}Statement pq:{qualifier} ?{v}{qualifier} . }}"
                );
            }
        }
        body.push_str("  }\n");
    }

    format!(
        r#"PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX p: <http://www.wikidata.org/prop/>
PREFIX ps: <http://www.wikidata.org/prop/statement/>
PREFIX pq: <http://www.wikidata.org/prop/qualifier/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>
PREFIX schema: <http://schema.org/>
SELECT {select} WHERE {{
  BIND(wd:{id} AS ?item)
{body}  OPTIONAL {{ ?article schema:about ?item ; schema:isPartOf <https://en.wikipedia.org/> . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}
LIMIT {RESULT_ROW_LIMIT}"#
    )
}

/// Render a raw binding value for display: entity URIs become ids and
/// midnight timestamps become plain dates.
pub fn format_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(id) = raw.strip_prefix(ENTITY_URI_PREFIX) {
        return id.to_string();
    }
    if let Some(date) = raw.strip_suffix("T00:00:00Z") {
        return date.trim_start_matches('+').to_string();
    }
    raw.to_string()
}

/// Collapse the batched result set into one record per requested property.
///
/// Batched OPTIONAL blocks multiply rows, so every value/qualifier tuple is
/// de-duplicated by exact match before the per-property cap applies.
pub fn collect_property_records(
    rows: &[Row],
    properties: &[String],
    include_qualifiers: bool,
) -> Vec<PropertyRecord> {
    properties
        .iter()
        .map(|code| {
            let v = var_prefix(code);
            let mut values: Vec<PropertyValue> = Vec::new();
            for row in rows {
                let raw = row
                    .get(&format!("{v}ValueLabel"))
                    .or_else(|| row.get(&format!("{v}Value")));
                let Some(raw) = raw else {
                    continue;
                };
                let mut qualifiers = BTreeMap::new();
                if include_qualifiers {
                    for (qualifier, _) in TEMPORAL_QUALIFIERS {
                        if let Some(q) = row.get(&format!("{v}{qualifier}")) {
                            qualifiers.insert(qualifier.to_string(), format_value(q));
                        }
                    }
                }
                let candidate = PropertyValue {
                    value: format_value(raw),
                    qualifiers,
                };
                if values.contains(&candidate) {
                    continue;
                }
                if values.len() < MAX_VALUES_PER_PROPERTY {
                    values.push(candidate);
                }
            }
            PropertyRecord {
                code: code.clone(),
                label: catalog::property_label(code)
                    .map(str::to_string)
                    .unwrap_or_else(|| code.clone()),
                values,
            }
        })
        .collect()
}

fn render_qualifiers(qualifiers: &BTreeMap<String, String>) -> String {
    let parts: Vec<String> = TEMPORAL_QUALIFIERS
        .iter()
        .filter_map(|(code, name)| qualifiers.get(*code).map(|v| format!("{name}: {v}")))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

pub fn render_fact_sheet(id: &str, rows: &[Row], records: &[PropertyRecord]) -> String {
    let first = rows.first();
    let field = |name: &str| first.and_then(|r| r.get(name)).map(|s| s.trim().to_string());
    let label = field("itemLabel").filter(|s| !s.is_empty()).unwrap_or_else(|| id.to_string());
    let description = field("itemDescription").unwrap_or_else(|| "(no description)".to_string());

    let mut out = format!("Entity: {label}\nQID: {id}\nDescription: {description}\n");
    if let Some(article) = field("article") {
        let _ = writeln!(out, "Article: {article}");
    }
    out.push('\n');

    for record in records {
        let code = &record.code;
        let label = &record.label;
        match record.values.as_slice() {
            [] => {
                let _ = writeln!(out, "{code}: {label}: (not available)");
            }
            [single] if single.qualifiers.is_empty() => {
                let _ = writeln!(out, "{code}: {label} — {}", single.value);
            }
            values => {
                let _ = writeln!(out, "{code}: {label}:");
                for value in values {
                    let _ = writeln!(
                        out,
                        "  - {}{}",
                        value.value,
                        render_qualifiers(&value.qualifiers)
                    );
                }
            }
        }
    }

    out.trim_end().to_string()
}

fn entity_missing(id: &str, rows: &[Row], records: &[PropertyRecord]) -> bool {
    let Some(first) = rows.first() else {
        return true;
    };
    let label_is_id = first
        .get("itemLabel")
        .map(|l| entity_id_from_uri(l) == id)
        .unwrap_or(true);
    label_is_id
        && !first.contains_key("itemDescription")
        && !first.contains_key("article")
        && records.iter().all(|r| r.values.is_empty())
}

pub fn fetch_entity_properties(
    sparql: &dyn SparqlEndpoint,
    state: &mut ProtocolState,
    args: &PropertyArgs,
) -> ToolOutcome {
    let id = match check_literal_id(&args.qid) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    if !state.is_authorized(&id) {
        tracing::debug!(qid = %id, "rejected unauthorized property fetch");
        return ToolOutcome::violation(unauthorized_message(&id, state));
    }

    let properties = valid_properties(&args.properties);
    if properties.is_empty() {
        return ToolOutcome::invalid(
            "Error: No valid properties specified. Use catalogued property codes such as \
             P31 (instance of), P569 (date of birth) or P108 (employer).",
        );
    }
    let include_qualifiers = args.include_qualifiers.unwrap_or(true);

    let query = build_property_query(&id, &properties, include_qualifiers);
    let rows = match sparql.select(&query) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(qid = %id, error = %e, "property fetch failed");
            return ToolOutcome::upstream(format!(
                "Error: Could not fetch properties for {id} ({e}). These facts cannot be verified right now."
            ));
        }
    };

    let records = collect_property_records(&rows, &properties, include_qualifiers);
    if entity_missing(&id, &rows, &records) {
        return ToolOutcome::no_data(format!(
            "No data: entity {id} was not found or has no data for the requested properties."
        ));
    }

    let mut sheet = render_fact_sheet(&id, &rows, &records);
    if rows.len() >= RESULT_ROW_LIMIT {
        // Qualifier OPTIONALs multiply rows; values past the limit are lost.
        tracing::warn!(qid = %id, rows = rows.len(), "property fetch hit the row limit");
        let _ = write!(
            sheet,
            "\n\nIncomplete: the result reached the {RESULT_ROW_LIMIT}-row limit, so some values \
             may be missing. Request fewer properties at a time for a complete list."
        );
    }
    ToolOutcome::ok(sheet)
}
