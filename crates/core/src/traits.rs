use crate::{ProviderError, RetrievalHit};
use async_trait::async_trait;

/// Nearest-neighbour store over every chunk in the corpus. Shared read-only.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` hits ordered by ascending distance.
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, ProviderError>;
}

/// Text completion used for concept extraction, synonym expansion and batch adjudication.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

/// Pairwise relevance scorer (cross-encoder). One score per `(query, passage)` pair.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, ProviderError>;
}
