use thiserror::Error;

/// Failures at the knowledge-graph / article boundary.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("network error: {0}")]
    Network(String),

    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type GraphResult<T> = Result<T, GraphError>;
