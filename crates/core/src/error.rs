use thiserror::Error;

/// Failure of an external collaborator: embedding provider, vector index,
/// language model or reranker.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider not available yet: {0}")]
    NotReady(String),
}

impl ProviderError {
    pub fn backend(backend: &str, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

/// Errors surfaced to callers of the counting API.
#[derive(Debug, Error)]
pub enum CountError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("could not determine a concept to count for question: {question}")]
    NoConcept { question: String },

    #[error("invalid count options: {0}")]
    InvalidOptions(String),

    #[error("index unavailable: {0}")]
    Index(#[from] ProviderError),

    #[error("blocking count called from inside an async runtime; use count_concept instead")]
    InsideRuntime,

    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
