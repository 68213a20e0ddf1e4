//! SPARQL SELECT access to the knowledge graph.
//!
//! Everything above this module sees a result set as an ordered list of flat
//! `variable -> value` rows. Unbound variables are simply absent from a row.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{GraphError, GraphResult};

/// One solution of a SELECT query.
pub type Row = BTreeMap<String, String>;

pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// A read-only SPARQL service.
pub trait SparqlEndpoint {
    fn select(&self, query: &str) -> GraphResult<Vec<Row>>;
}

impl<T: SparqlEndpoint + ?Sized> SparqlEndpoint for &T {
    fn select(&self, query: &str) -> GraphResult<Vec<Row>> {
        (**self).select(query)
    }
}

impl<T: SparqlEndpoint + ?Sized> SparqlEndpoint for Box<T> {
    fn select(&self, query: &str) -> GraphResult<Vec<Row>> {
        (**self).select(query)
    }
}

/// Endpoint backed by a closure. Used for offline runs and tests.
pub struct FnEndpoint<F>(F);

impl<F> FnEndpoint<F>
where
    F: Fn(&str) -> GraphResult<Vec<Row>>,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> SparqlEndpoint for FnEndpoint<F>
where
    F: Fn(&str) -> GraphResult<Vec<Row>>,
{
    fn select(&self, query: &str) -> GraphResult<Vec<Row>> {
        (self.0)(query)
    }
}

#[derive(Debug, Deserialize)]
struct SelectResponse {
    results: SelectBindings,
}

#[derive(Debug, Deserialize)]
struct SelectBindings {
    #[serde(default)]
    bindings: Vec<BTreeMap<String, BoundTerm>>,
}

#[derive(Debug, Deserialize)]
struct BoundTerm {
    value: String,
}

/// Decode a `application/sparql-results+json` document into rows.
pub fn decode_select_results(body: &str) -> GraphResult<Vec<Row>> {
    let parsed: SelectResponse = serde_json::from_str(body)
        .map_err(|e| GraphError::InvalidResponse(format!("not a SPARQL JSON result set: {e}")))?;
    Ok(parsed
        .results
        .bindings
        .into_iter()
        .map(|binding| {
            binding
                .into_iter()
                .map(|(var, term)| (var, term.value))
                .collect()
        })
        .collect())
}

/// Escape a string for use inside a double-quoted SPARQL literal.
pub fn escape_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' | '\r' | '\t' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

/// `http://www.wikidata.org/entity/Q142` -> `Q142`.
pub fn entity_id_from_uri(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

#[cfg(feature = "http")]
pub use http::HttpSparqlEndpoint;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};

    use super::{decode_select_results, Row, SparqlEndpoint, SPARQL_RESULTS_JSON};
    use crate::config::GraphSettings;
    use crate::error::{GraphError, GraphResult};

    /// Blocking HTTP client for a public SPARQL endpoint.
    pub struct HttpSparqlEndpoint {
        client: Client,
        endpoint: url::Url,
    }

    impl HttpSparqlEndpoint {
        pub fn new(settings: &GraphSettings) -> GraphResult<Self> {
            let endpoint = url::Url::parse(&settings.sparql_endpoint).map_err(|e| {
                GraphError::Config(format!(
                    "invalid SPARQL endpoint {:?}: {e}",
                    settings.sparql_endpoint
                ))
            })?;
            Ok(Self {
                client: build_http_client(&settings.user_agent, settings.timeout_secs)?,
                endpoint,
            })
        }

        pub fn endpoint(&self) -> &str {
            self.endpoint.as_str()
        }
    }

    impl SparqlEndpoint for HttpSparqlEndpoint {
        fn select(&self, query: &str) -> GraphResult<Vec<Row>> {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("query", query)
                .finish();

            let resp = self
                .client
                .post(self.endpoint.clone())
                .header(ACCEPT, SPARQL_RESULTS_JSON)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .map_err(|e| GraphError::Network(format!("failed to reach {}: {e}", self.endpoint)))?;

            let status = resp.status();
            let text = resp
                .text()
                .map_err(|e| GraphError::Network(format!("failed to read response body: {e}")))?;
            if !status.is_success() {
                return Err(GraphError::Status {
                    status: status.as_u16(),
                    body: truncate_for_error(&text),
                });
            }
            decode_select_results(&text)
        }
    }

    pub(crate) fn build_http_client(user_agent: &str, timeout_secs: u64) -> GraphResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).unwrap_or_else(|_| HeaderValue::from_static("kbqa")),
        );

        Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GraphError::Config(format!("failed to build http client: {e}")))
    }

    // Query-service errors echo the whole query back; keep the first part.
    fn truncate_for_error(text: &str) -> String {
        const MAX: usize = 400;
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}…", &text[..idx]),
            None => text.to_string(),
        }
    }
}

#[cfg(feature = "http")]
pub(crate) use http::build_http_client;
