use crate::traits::VectorIndex;
use crate::{Chunk, Metadata, ProviderError, RetrievalHit};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TEXT_FIELD: &str = "text";

/// Read-only search against a Qdrant collection built with the `Euclid` metric.
pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
    text_field: String,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: crate::providers::http_client(crate::providers::DEFAULT_REQUEST_TIMEOUT)?,
            vector_size,
            text_field: DEFAULT_TEXT_FIELD.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = crate::providers::http_client(timeout)?;
        Ok(self)
    }

    pub fn with_text_field(mut self, text_field: impl Into<String>) -> Self {
        self.text_field = text_field.into();
        self
    }

    fn search_url(&self) -> Result<Url, ProviderError> {
        crate::providers::endpoint(
            self.endpoint.as_str(),
            &format!("collections/{}/points/search", self.collection),
        )
    }

    fn parse_hits(&self, parsed: &Value) -> Result<Vec<RetrievalHit>, ProviderError> {
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::backend("qdrant", "missing result array"))?;

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(distance) = hit.pointer("/score").and_then(Value::as_f64) else {
                continue;
            };
            let mut metadata: Metadata = hit
                .pointer("/payload")
                .and_then(Value::as_object)
                .map(|payload| payload.clone().into_iter().collect())
                .unwrap_or_default();
            let text = metadata
                .remove(&self.text_field)
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();

            // Qdrant reports plain euclidean distance; thresholds are calibrated on squared L2.
            let distance = (distance * distance) as f32;
            result.push(RetrievalHit {
                chunk: Chunk::new(text, metadata),
                distance,
            });
        }

        result.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        Ok(result)
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, ProviderError> {
        if query_vector.len() != self.vector_size {
            return Err(ProviderError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.search_url()?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::backend("qdrant", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        self.parse_hits(&parsed)
    }
}
