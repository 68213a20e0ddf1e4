//! KBQA Graph: read-only access to the knowledge graph and its articles.
//!
//! ```text
//! ┌─────────────────┐   SELECT    ┌──────────────────────┐
//! │  agent tools    │────────────►│ SparqlEndpoint        │──► query service
//! │  (kbqa-agent)   │             └──────────────────────┘
//! │                 │   title     ┌──────────────────────┐
//! │                 │────────────►│ DocumentSource        │──► page HTML
//! └─────────────────┘             └──────────┬───────────┘
//!                                            │ html_to_plain_text
//!                                            ▼
//!                                       plain text
//! ```
//!
//! Both seams are traits so the agent can run against in-memory fakes
//! (`FnEndpoint`, `StaticDocuments`) as well as the HTTP implementations
//! (behind the default `http` feature).

pub mod catalog;
pub mod config;
pub mod documents;
pub mod error;
pub mod sparql;

pub use config::GraphSettings;
pub use documents::{article_url, html_to_plain_text, DocumentSource, StaticDocuments};
pub use error::{GraphError, GraphResult};
pub use sparql::{FnEndpoint, Row, SparqlEndpoint};

#[cfg(feature = "http")]
pub use documents::HttpDocumentSource;
#[cfg(feature = "http")]
pub use sparql::HttpSparqlEndpoint;
