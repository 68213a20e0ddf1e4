//! The four retrieval tools and their dispatcher.
//!
//! Tool order enforced through [`ProtocolState`]:
//!
//! 1. `search_entity_candidates` authorizes entity ids
//! 2. `fetch_entity_properties` only accepts authorized ids
//! 3. `wikidata_sparql` (escalation) may run at any time; it unlocks step 4
//! 4. `fetch_wikipedia_article` requires a prior escalation attempt
//!
//! Tools never fail with a Rust error: every failure becomes a [`ToolOutcome`]
//! the model can read, classified by [`OutcomeKind`].

pub mod article;
pub mod escalation;
pub mod properties;
pub mod search;

use kbqa_graph::config::env_usize;
use kbqa_graph::{DocumentSource, GraphResult, SparqlEndpoint};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::llm::ToolSpec;
use crate::protocol::ProtocolState;

pub const SEARCH_ENTITY_CANDIDATES: &str = "search_entity_candidates";
pub const FETCH_ENTITY_PROPERTIES: &str = "fetch_entity_properties";
pub const WIKIDATA_SPARQL: &str = "wikidata_sparql";
pub const FETCH_WIKIPEDIA_ARTICLE: &str = "fetch_wikipedia_article";

pub const TOOL_NAMES: [&str; 4] = [
    SEARCH_ENTITY_CANDIDATES,
    FETCH_ENTITY_PROPERTIES,
    WIKIDATA_SPARQL,
    FETCH_WIKIPEDIA_ARTICLE,
];

pub const MAX_SEARCH_RESULTS_ENV: &str = "KBQA_MAX_SEARCH_RESULTS";
pub const MAX_ARTICLE_CHARS_ENV: &str = "KBQA_MAX_ARTICLE_CHARS";
pub const DEFAULT_SPARQL_ROWS_ENV: &str = "KBQA_DEFAULT_SPARQL_ROWS";

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Ok,
    /// Legitimate empty result (no candidates, no rows, no article).
    NoData,
    /// Tool called out of order or with an unauthorized id.
    ProtocolViolation,
    /// Malformed id, unsafe query, unknown tool, bad argument shape.
    InvalidArguments,
    /// The knowledge graph or article service failed.
    Upstream,
}

impl OutcomeKind {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation | Self::InvalidArguments | Self::Upstream
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub kind: OutcomeKind,
    pub text: String,
}

impl ToolOutcome {
    fn with_kind(kind: OutcomeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::Ok, text)
    }

    pub fn no_data(text: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::NoData, text)
    }

    pub fn violation(text: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::ProtocolViolation, text)
    }

    pub fn invalid(text: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::InvalidArguments, text)
    }

    pub fn upstream(text: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::Upstream, text)
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchArgs {
    #[serde(alias = "name", alias = "entity", alias = "query")]
    pub entity_name: String,
    #[serde(default, alias = "type")]
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyArgs {
    #[serde(alias = "id", alias = "entity_id")]
    pub qid: String,
    #[serde(default, deserialize_with = "deserialize_property_list")]
    pub properties: Vec<String>,
    #[serde(default)]
    pub include_qualifiers: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EscalationArgs {
    #[serde(alias = "query")]
    pub sparql: String,
    #[serde(default, alias = "limit", deserialize_with = "deserialize_lenient_usize")]
    pub max_rows: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArticleArgs {
    #[serde(alias = "id", alias = "entity_id")]
    pub qid: String,
    #[serde(default, alias = "name")]
    pub entity_name: Option<String>,
}

/// A parsed tool invocation. The agent loop matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    SearchEntityCandidates(SearchArgs),
    FetchEntityProperties(PropertyArgs),
    QueryEscalation(EscalationArgs),
    FetchArticle(ArticleArgs),
}

impl ToolRequest {
    /// Parse a model-issued `(name, arguments)` pair.
    ///
    /// `arguments` may be an object, a JSON-encoded string of an object, or
    /// null. Failures are returned as `InvalidArguments` outcomes so they can
    /// be fed straight back to the model.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolOutcome> {
        let name = name.trim();
        let args = normalize_arguments(arguments);
        let parsed = match name {
            SEARCH_ENTITY_CANDIDATES => {
                serde_json::from_value(args).map(Self::SearchEntityCandidates)
            }
            FETCH_ENTITY_PROPERTIES => serde_json::from_value(args).map(Self::FetchEntityProperties),
            WIKIDATA_SPARQL => serde_json::from_value(args).map(Self::QueryEscalation),
            FETCH_WIKIPEDIA_ARTICLE => serde_json::from_value(args).map(Self::FetchArticle),
            other => {
                return Err(ToolOutcome::invalid(format!(
                    "Error: Unknown tool '{other}'. Available tools: {}.",
                    TOOL_NAMES.join(", ")
                )))
            }
        };
        parsed.map_err(|e| {
            ToolOutcome::invalid(format!("Error: Invalid arguments for {name}: {e}."))
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchEntityCandidates(_) => SEARCH_ENTITY_CANDIDATES,
            Self::FetchEntityProperties(_) => FETCH_ENTITY_PROPERTIES,
            Self::QueryEscalation(_) => WIKIDATA_SPARQL,
            Self::FetchArticle(_) => FETCH_WIKIPEDIA_ARTICLE,
        }
    }
}

fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Null => json!({}),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => arguments.clone(),
        },
        other => other.clone(),
    }
}

/// Accepts `["P36", "P17"]`, `[["P36"], "P17"]` (flattened one level) and
/// `"P36, P17"`. Non-string entries are ignored.
fn deserialize_property_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn push_str(out: &mut Vec<String>, s: &str) {
        out.extend(
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
    }

    let value = Value::deserialize(deserializer)?;
    let mut out = Vec::new();
    match value {
        Value::String(s) => push_str(&mut out, &s),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => push_str(&mut out, &s),
                    Value::Array(nested) => {
                        for inner in nested {
                            if let Value::String(s) = inner {
                                push_str(&mut out, &s);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(out)
}

fn deserialize_lenient_usize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_u64() {
            Some(v) => Ok(Some(usize::try_from(v).unwrap_or(usize::MAX))),
            None if n.as_i64().is_some() => Ok(Some(0)),
            None => Err(D::Error::custom(format!("expected a row count, got {n}"))),
        },
        Value::String(s) => s
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a row count, got {s:?}"))),
        other => Err(D::Error::custom(format!("expected a row count, got {other}"))),
    }
}

// ============================================================================
// Toolkit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSettings {
    pub max_search_results: usize,
    pub default_sparql_rows: usize,
    pub max_article_chars: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_search_results: search::DEFAULT_MAX_RESULTS,
            default_sparql_rows: escalation::DEFAULT_ROWS,
            max_article_chars: article::DEFAULT_MAX_ARTICLE_CHARS,
        }
    }
}

impl ToolSettings {
    pub fn from_env() -> GraphResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_search_results: env_usize(
                MAX_SEARCH_RESULTS_ENV,
                defaults.max_search_results,
                1,
                50,
            )?,
            default_sparql_rows: env_usize(
                DEFAULT_SPARQL_ROWS_ENV,
                defaults.default_sparql_rows,
                1,
                escalation::HARD_ROW_CAP,
            )?,
            max_article_chars: env_usize(
                MAX_ARTICLE_CHARS_ENV,
                defaults.max_article_chars,
                500,
                200_000,
            )?,
        })
    }
}

/// The external endpoints plus tool limits. Stateless across runs: all
/// per-run state lives in the [`ProtocolState`] passed to [`Toolkit::execute`].
pub struct Toolkit {
    sparql: Box<dyn SparqlEndpoint>,
    documents: Box<dyn DocumentSource>,
    settings: ToolSettings,
}

impl Toolkit {
    pub fn new(sparql: Box<dyn SparqlEndpoint>, documents: Box<dyn DocumentSource>) -> Self {
        Self {
            sparql,
            documents,
            settings: ToolSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ToolSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn execute(&self, state: &mut ProtocolState, request: &ToolRequest) -> ToolOutcome {
        match request {
            ToolRequest::SearchEntityCandidates(args) => search::search_entity_candidates(
                self.sparql.as_ref(),
                state,
                args,
                self.settings.max_search_results,
            ),
            ToolRequest::FetchEntityProperties(args) => {
                properties::fetch_entity_properties(self.sparql.as_ref(), state, args)
            }
            ToolRequest::QueryEscalation(args) => escalation::run_query_escalation(
                self.sparql.as_ref(),
                state,
                args,
                self.settings.default_sparql_rows,
            ),
            ToolRequest::FetchArticle(args) => article::fetch_article(
                self.sparql.as_ref(),
                self.documents.as_ref(),
                state,
                args,
                self.settings.max_article_chars,
            ),
        }
    }

    /// Schemas advertised to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        tool_specs()
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: SEARCH_ENTITY_CANDIDATES.to_string(),
            description: "Step 1 (always first). Search the knowledge graph for entities matching a \
                          name and list candidate QIDs with labels, descriptions and types. Only QIDs \
                          listed here may be used with fetch_entity_properties."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "entity_name": {"type": "string", "description": "Name of the entity as written in the question."},
                    "entity_type": {"type": "string", "description": "Optional type hint, e.g. person, country, city, film, company."}
                },
                "required": ["entity_name"]
            }),
        },
        ToolSpec {
            name: FETCH_ENTITY_PROPERTIES.to_string(),
            description: "Step 2. Fetch verified properties (with start/end/point-in-time qualifiers) \
                          for one literal QID returned by search_entity_candidates in this conversation."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "qid": {"type": "string", "description": "One literal QID such as 'Q142'."},
                    "properties": {"type": "array", "items": {"type": "string"}, "description": "Property codes such as ['P569', 'P108']."},
                    "include_qualifiers": {"type": "boolean", "description": "Include start/end/point-in-time qualifiers (default true)."}
                },
                "required": ["qid", "properties"]
            }),
        },
        ToolSpec {
            name: WIKIDATA_SPARQL.to_string(),
            description: "Step 3 (only if step 2 is insufficient). Run a read-only SPARQL SELECT query \
                          against the knowledge graph. Results are capped."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sparql": {"type": "string", "description": "A SELECT query, optionally preceded by PREFIX declarations."},
                    "max_rows": {"type": "integer", "description": "Maximum rows to return (default 25, hard cap 100)."}
                },
                "required": ["sparql"]
            }),
        },
        ToolSpec {
            name: FETCH_WIKIPEDIA_ARTICLE.to_string(),
            description: "Step 4 (last resort, only after wikidata_sparql). Fetch the plain-text \
                          encyclopedia article for a QID."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "qid": {"type": "string", "description": "One literal QID such as 'Q937'."},
                    "entity_name": {"type": "string", "description": "Entity name, used for display."}
                },
                "required": ["qid"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_tool_and_aliases() {
        let search = ToolRequest::parse(
            SEARCH_ENTITY_CANDIDATES,
            &json!({"entity_name": "France", "entity_type": "country"}),
        )
        .unwrap();
        assert_eq!(
            search,
            ToolRequest::SearchEntityCandidates(SearchArgs {
                entity_name: "France".to_string(),
                entity_type: Some("country".to_string()),
            })
        );

        let fetch = ToolRequest::parse(
            FETCH_ENTITY_PROPERTIES,
            &json!({"id": "Q142", "properties": [["P36"], "P17, P30"]}),
        )
        .unwrap();
        let ToolRequest::FetchEntityProperties(args) = fetch else {
            panic!("expected property fetch");
        };
        assert_eq!(args.qid, "Q142");
        assert_eq!(args.properties, vec!["P36", "P17", "P30"]);
        assert_eq!(args.include_qualifiers, None);

        let sparql = ToolRequest::parse(
            WIKIDATA_SPARQL,
            &json!({"query": "SELECT ?x WHERE {}", "max_rows": "10"}),
        )
        .unwrap();
        assert_eq!(sparql.name(), WIKIDATA_SPARQL);
        let ToolRequest::QueryEscalation(args) = sparql else {
            panic!("expected escalation");
        };
        assert_eq!(args.max_rows, Some(10));
    }

    #[test]
    fn accepts_json_encoded_argument_strings() {
        let req = ToolRequest::parse(
            FETCH_WIKIPEDIA_ARTICLE,
            &Value::String(r#"{"qid": "Q937", "entity_name": "Albert Einstein"}"#.to_string()),
        )
        .unwrap();
        assert_eq!(req.name(), FETCH_WIKIPEDIA_ARTICLE);
    }

    #[test]
    fn unknown_tool_lists_available_tools() {
        let err = ToolRequest::parse("python", &json!({"code": "1+1"})).unwrap_err();
        assert_eq!(err.kind, OutcomeKind::InvalidArguments);
        assert!(err.text.contains("Unknown tool 'python'"));
        for name in TOOL_NAMES {
            assert!(err.text.contains(name));
        }
    }

    #[test]
    fn missing_required_argument_is_invalid() {
        let err = ToolRequest::parse(FETCH_ENTITY_PROPERTIES, &Value::Null).unwrap_err();
        assert_eq!(err.kind, OutcomeKind::InvalidArguments);
        assert!(err.text.contains(FETCH_ENTITY_PROPERTIES));
    }

    #[test]
    fn specs_cover_every_tool() {
        let names: Vec<String> = tool_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, TOOL_NAMES.map(str::to_string).to_vec());
    }
}
