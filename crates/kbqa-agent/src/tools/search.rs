//! Entity search: turn a free-text name into ranked, authorized candidates.

use std::collections::HashMap;

use kbqa_graph::sparql::{entity_id_from_uri, escape_literal};
use kbqa_graph::{Row, SparqlEndpoint};
use serde::Serialize;

use super::{SearchArgs, ToolOutcome, FETCH_ENTITY_PROPERTIES};
use crate::protocol::ProtocolState;

pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Facets shown per candidate line.
const MAX_DISPLAY_TYPES: usize = 3;

/// Descriptions of internal wiki pages that are never real-world entities.
pub const META_DESCRIPTIONS: &[&str] = &[
    "wikimedia category",
    "wikimedia disambiguation page",
    "wikimedia template",
    "wikimedia project page",
    "wikimedia list article",
    "wikimedia internal item",
    "wikimedia module",
];

const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("person", &["person", "human", "politician", "scientist", "artist", "author"]),
    ("scientist", &["scientist", "researcher", "physicist", "biologist", "chemist"]),
    ("politician", &["politician", "president", "prime minister", "senator", "governor"]),
    ("athlete", &["athlete", "footballer", "basketball player", "runner", "swimmer"]),
    ("country", &["country", "sovereign state", "nation"]),
    ("city", &["city", "town", "municipality", "metropolis"]),
    ("organization", &["organization", "company", "university", "institution"]),
    ("mountain", &["mountain", "peak", "summit"]),
    ("lake", &["lake", "body of water"]),
    ("island", &["island", "archipelago"]),
    ("film", &["film", "movie", "motion picture"]),
    ("book", &["book", "novel", "literary work", "publication"]),
    ("album", &["album", "studio album", "music album"]),
    ("song", &["song", "single", "musical composition"]),
    ("painting", &["painting", "artwork", "oil painting"]),
    ("software", &["software", "computer program", "application"]),
    ("game", &["video game", "game", "computer game"]),
    ("company", &["company", "corporation", "business", "enterprise"]),
    ("band", &["band", "musical group", "rock band"]),
    ("sports_team", &["sports team", "football club", "basketball team"]),
    ("political_party", &["political party", "party"]),
    ("ngo", &["non-governmental organization", "ngo", "nonprofit"]),
    ("species", &["species", "taxon", "organism"]),
    ("chemical", &["chemical compound", "chemical element", "molecule"]),
    ("disease", &["disease", "medical condition", "illness"]),
    ("event", &["event", "occurrence", "historical event"]),
    ("award", &["award", "prize", "honor"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityCandidate {
    pub id: String,
    pub label: String,
    pub description: String,
    pub types: Vec<String>,
}

/// Entity-search query returning up to `2 * limit` raw rows, one per
/// (item, instance-of) pair.
pub fn build_search_query(entity_name: &str, limit: usize) -> String {
    let label = escape_literal(entity_name);
    let raw_limit = limit.max(1) * 2;
    format!(
        r#"PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX wikibase: <http://wikiba.se/ontology#>
PREFIX bd: <http://www.bigdata.com/rdf#>
PREFIX mwapi: <https://www.mediawiki.org/ontology#API/>
SELECT ?item ?itemLabel ?itemDescription ?instanceOfLabel WHERE {{
  SERVICE wikibase:mwapi {{
    bd:serviceParam wikibase:api "EntitySearch" ;
                    wikibase:endpoint "www.wikidata.org" ;
                    mwapi:search "{label}" ;
                    mwapi:language "en" .
    ?item wikibase:apiOutputItem mwapi:item .
  }}
  OPTIONAL {{ ?item wdt:P31 ?instanceOf . }}
  SERVICE wikibase:label {{ bd:serviceParam wikibase:language "en". }}
}}
LIMIT {raw_limit}"#
    )
}

/// Merge raw rows by id, preserving first-seen order and unioning facets.
pub fn merge_candidates(rows: &[Row]) -> Vec<EntityCandidate> {
    let mut merged: Vec<EntityCandidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(item) = row.get("item") else {
            continue;
        };
        let id = entity_id_from_uri(item).to_string();
        if id.is_empty() {
            continue;
        }

        let slot = match index.get(&id) {
            Some(&slot) => slot,
            None => {
                index.insert(id.clone(), merged.len());
                merged.push(EntityCandidate {
                    label: row
                        .get("itemLabel")
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| id.clone()),
                    description: row
                        .get("itemDescription")
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                    id,
                    types: Vec::new(),
                });
                merged.len() - 1
            }
        };

        let candidate = &mut merged[slot];
        if candidate.description.is_empty() {
            if let Some(desc) = row.get("itemDescription") {
                candidate.description = desc.trim().to_string();
            }
        }
        if let Some(facet) = row.get("instanceOfLabel").map(|s| s.trim()) {
            if !facet.is_empty() && !candidate.types.iter().any(|t| t == facet) {
                candidate.types.push(facet.to_string());
            }
        }
    }

    merged
}

pub fn is_meta_candidate(candidate: &EntityCandidate) -> bool {
    let desc = candidate.description.trim().to_lowercase();
    META_DESCRIPTIONS.contains(&desc.as_str())
}

/// Keywords for a type hint; unknown hints match themselves.
pub fn type_keywords(entity_type: &str) -> Vec<String> {
    let hint = entity_type.trim().to_lowercase();
    if hint.is_empty() {
        return Vec::new();
    }
    TYPE_KEYWORDS
        .iter()
        .find(|(name, _)| *name == hint)
        .map(|(_, kws)| kws.iter().map(|kw| kw.to_string()).collect())
        .unwrap_or_else(|| vec![hint])
}

/// +2 per keyword in the description, +3 per keyword in any facet.
pub fn score_candidate(candidate: &EntityCandidate, keywords: &[String]) -> u32 {
    let desc = candidate.description.to_lowercase();
    let types: Vec<String> = candidate.types.iter().map(|t| t.to_lowercase()).collect();

    keywords
        .iter()
        .map(|kw| {
            let mut score = 0;
            if desc.contains(kw.as_str()) {
                score += 2;
            }
            if types.iter().any(|t| t.contains(kw.as_str())) {
                score += 3;
            }
            score
        })
        .sum()
}

/// Filter meta pages, rank by type hint (stable; ties keep upstream order)
/// and truncate.
pub fn rank_candidates(
    candidates: Vec<EntityCandidate>,
    entity_type: &str,
    limit: usize,
) -> Vec<EntityCandidate> {
    let mut kept: Vec<EntityCandidate> = candidates
        .into_iter()
        .filter(|c| !is_meta_candidate(c))
        .collect();

    let keywords = type_keywords(entity_type);
    if !keywords.is_empty() {
        let mut scored: Vec<(u32, EntityCandidate)> = kept
            .into_iter()
            .map(|c| (score_candidate(&c, &keywords), c))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        kept = scored.into_iter().map(|(_, c)| c).collect();
    }

    kept.truncate(limit.max(1));
    kept
}

pub fn no_candidates_message(entity_name: &str) -> String {
    format!("NO CANDIDATES FOUND for '{entity_name}'. Entity cannot be verified.")
}

pub fn render_candidates(entity_name: &str, candidates: &[EntityCandidate]) -> String {
    let Some(first) = candidates.first() else {
        return no_candidates_message(entity_name);
    };

    let mut out = format!(
        "CANDIDATES for '{entity_name}' ({} found):\n\n",
        candidates.len()
    );
    for (i, c) in candidates.iter().enumerate() {
        let types = c
            .types
            .iter()
            .take(MAX_DISPLAY_TYPES)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let detail = match (c.description.is_empty(), types.is_empty()) {
            (false, false) => format!(" - {} (Type: {types})", c.description),
            (false, true) => format!(" - {}", c.description),
            (true, false) => format!(" (Type: {types})"),
            (true, true) => " (no description)".to_string(),
        };
        out.push_str(&format!("{}. [{}] {}{detail}\n", i + 1, c.id, c.label));
    }
    out.push_str(&format!(
        "\nNEXT STEP: Call {FETCH_ENTITY_PROPERTIES} with one literal QID from above \
         (example: qid='{}'). Do not use code/expression syntax.",
        first.id
    ));
    out
}

pub fn search_entity_candidates(
    sparql: &dyn SparqlEndpoint,
    state: &mut ProtocolState,
    args: &SearchArgs,
    limit: usize,
) -> ToolOutcome {
    let entity_name = args
        .entity_name
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if entity_name.is_empty() {
        return ToolOutcome::invalid(
            "Error: entity_name must be a non-empty name (e.g., entity_name='France').",
        );
    }
    let entity_type = args.entity_type.as_deref().unwrap_or("");

    let rows = match sparql.select(&build_search_query(&entity_name, limit)) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(entity = %entity_name, error = %e, "entity search failed; treating as no candidates");
            Vec::new()
        }
    };

    let candidates = rank_candidates(merge_candidates(&rows), entity_type, limit);
    if candidates.is_empty() {
        return ToolOutcome::no_data(no_candidates_message(&entity_name));
    }

    let registered = state.register(&entity_name, candidates.iter().map(|c| c.id.as_str()));
    tracing::debug!(entity = %entity_name, ids = ?registered, "authorized search candidates");

    ToolOutcome::ok(render_candidates(&entity_name, &candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, label: &str, desc: Option<&str>, facet: Option<&str>) -> Row {
        let mut r = Row::new();
        r.insert(
            "item".to_string(),
            format!("http://www.wikidata.org/entity/{id}"),
        );
        r.insert("itemLabel".to_string(), label.to_string());
        if let Some(desc) = desc {
            r.insert("itemDescription".to_string(), desc.to_string());
        }
        if let Some(facet) = facet {
            r.insert("instanceOfLabel".to_string(), facet.to_string());
        }
        r
    }

    #[test]
    fn merges_rows_and_unions_facets_in_order() {
        let rows = vec![
            row("Q142", "France", Some("country in Western Europe"), Some("country")),
            row("Q142", "France", Some("country in Western Europe"), Some("sovereign state")),
            row("Q142", "France", Some("country in Western Europe"), Some("country")),
            row("Q7", "France", None, None),
        ];
        let merged = merge_candidates(&rows);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].types, vec!["country", "sovereign state"]);
        assert_eq!(merged[1].description, "");
    }

    #[test]
    fn meta_pages_are_dropped() {
        let candidates = merge_candidates(&[
            row("Q1", "Mercury", Some("Wikimedia disambiguation page"), None),
            row("Q2", "Category:Mercury", Some("Wikimedia category"), None),
        ]);
        assert!(rank_candidates(candidates, "", 10).is_empty());
    }

    #[test]
    fn type_hint_reorders_with_stable_ties() {
        let candidates = merge_candidates(&[
            row("Q1", "Paris", Some("son of Priam in Greek mythology"), Some("mythological Greek character")),
            row("Q90", "Paris", Some("capital of France"), Some("city")),
            row("Q2", "Paris", Some("town in Texas"), Some("city of the United States")),
        ]);
        let ranked = rank_candidates(candidates, "city", 10);
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        // Q2: "town" in description (+2) plus "city" in facet (+3); Q90: "city" facet (+3).
        assert_eq!(ids, vec!["Q2", "Q90", "Q1"]);
    }

    #[test]
    fn unknown_type_hint_matches_itself() {
        assert_eq!(type_keywords("Volcano"), vec!["volcano"]);
        assert!(type_keywords("  ").is_empty());
        assert!(type_keywords("country").contains(&"sovereign state".to_string()));
    }

    #[test]
    fn renders_lines_with_optional_fields() {
        let candidates = vec![
            EntityCandidate {
                id: "Q142".into(),
                label: "France".into(),
                description: "country in Western Europe".into(),
                types: vec!["country".into(), "sovereign state".into(), "republic".into(), "state".into()],
            },
            EntityCandidate {
                id: "Q3".into(),
                label: "France".into(),
                description: String::new(),
                types: vec![],
            },
        ];
        let text = render_candidates("France", &candidates);
        assert!(text.starts_with("CANDIDATES for 'France' (2 found):\n\n"));
        assert!(text.contains(
            "1. [Q142] France - country in Western Europe (Type: country, sovereign state, republic)\n"
        ));
        assert!(text.contains("2. [Q3] France (no description)\n"));
        assert!(text.contains("NEXT STEP: Call fetch_entity_properties"));
        assert!(text.contains("qid='Q142'"));
    }

    #[test]
    fn search_query_escapes_label_and_doubles_limit() {
        let q = build_search_query(r#"The "Boss""#, 10);
        assert!(q.contains(r#"mwapi:search "The \"Boss\"""#));
        assert!(q.trim_end().ends_with("LIMIT 20"));
    }
}
