//! Environment-driven configuration for the graph and article endpoints.
//!
//! Precedence everywhere in the workspace is: explicit value (CLI flag) >
//! environment variable > built-in default. Integer variables are clamped to
//! a sane range; unparsable values are configuration errors.

use crate::error::{GraphError, GraphResult};

pub const SPARQL_ENDPOINT_ENV: &str = "KBQA_SPARQL_ENDPOINT";
pub const ARTICLE_BASE_URL_ENV: &str = "KBQA_ARTICLE_BASE_URL";
pub const USER_AGENT_ENV: &str = "KBQA_USER_AGENT";
pub const HTTP_TIMEOUT_SECS_ENV: &str = "KBQA_HTTP_TIMEOUT_SECS";

pub const DEFAULT_SPARQL_ENDPOINT: &str = "https://query.wikidata.org/sparql";
pub const DEFAULT_ARTICLE_BASE_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/html/";
pub const DEFAULT_USER_AGENT: &str = "kbqa/0.1 (grounded question answering research)";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Read a bounded integer from the environment.
pub fn env_usize(name: &str, default: usize, min: usize, max: usize) -> GraphResult<usize> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            let parsed = v
                .parse::<usize>()
                .map_err(|_| GraphError::Config(format!("invalid {name}={v:?} (expected integer)")))?;
            Ok(parsed.clamp(min, max))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(GraphError::Config(format!("failed to read {name}: {e}"))),
    }
}

/// Read a float from the environment (no clamping).
pub fn env_f32(name: &str, default: f32) -> GraphResult<f32> {
    match env_string(name)? {
        Some(v) => v
            .parse::<f32>()
            .map_err(|_| GraphError::Config(format!("invalid {name}={v:?} (expected number)"))),
        None => Ok(default),
    }
}

/// Read a non-empty, trimmed string from the environment.
pub fn env_string(name: &str) -> GraphResult<Option<String>> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            Ok((!v.is_empty()).then(|| v.to_string()))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(GraphError::Config(format!("failed to read {name}: {e}"))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    pub sparql_endpoint: String,
    pub article_base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            sparql_endpoint: DEFAULT_SPARQL_ENDPOINT.to_string(),
            article_base_url: DEFAULT_ARTICLE_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl GraphSettings {
    pub fn from_env() -> GraphResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            sparql_endpoint: env_string(SPARQL_ENDPOINT_ENV)?.unwrap_or(defaults.sparql_endpoint),
            article_base_url: env_string(ARTICLE_BASE_URL_ENV)?
                .unwrap_or(defaults.article_base_url),
            user_agent: env_string(USER_AGENT_ENV)?.unwrap_or(defaults.user_agent),
            timeout_secs: env_usize(
                HTTP_TIMEOUT_SECS_ENV,
                DEFAULT_HTTP_TIMEOUT_SECS as usize,
                1,
                600,
            )? as u64,
        })
    }

    pub fn with_sparql_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sparql_endpoint = endpoint.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_usize_clamps_and_rejects_garbage() {
        std::env::set_var("KBQA_TEST_ENV_USIZE_A", "5000");
        assert_eq!(env_usize("KBQA_TEST_ENV_USIZE_A", 10, 1, 100).unwrap(), 100);

        std::env::set_var("KBQA_TEST_ENV_USIZE_B", "  ");
        assert_eq!(env_usize("KBQA_TEST_ENV_USIZE_B", 10, 1, 100).unwrap(), 10);

        std::env::set_var("KBQA_TEST_ENV_USIZE_C", "ten");
        assert!(matches!(
            env_usize("KBQA_TEST_ENV_USIZE_C", 10, 1, 100),
            Err(GraphError::Config(_))
        ));

        assert_eq!(env_usize("KBQA_TEST_ENV_USIZE_MISSING", 7, 1, 100).unwrap(), 7);
    }

    #[test]
    fn builder_overrides_defaults() {
        let settings = GraphSettings::default()
            .with_sparql_endpoint("http://localhost:9999/sparql")
            .with_timeout_secs(0);
        assert_eq!(settings.sparql_endpoint, "http://localhost:9999/sparql");
        assert_eq!(settings.timeout_secs, 1);
        assert_eq!(settings.article_base_url, DEFAULT_ARTICLE_BASE_URL);
    }
}
