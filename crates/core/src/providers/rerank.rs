use crate::traits::Reranker;
use crate::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Client for `/rerank` endpoints that take one query and many documents.
pub struct HttpReranker {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
}

impl HttpReranker {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::http_client(super::DEFAULT_REQUEST_TIMEOUT)?,
            endpoint: super::endpoint(base_url, "rerank")?,
            api_key,
            model: model.into(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = super::http_client(timeout)?;
        Ok(self)
    }

    async fn rerank_group(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>, ProviderError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::backend("rerank", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        scores_in_input_order(&parsed, documents.len())
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, ProviderError> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (position, (query, _)) in pairs.iter().enumerate() {
            groups.entry(query.as_str()).or_default().push(position);
        }

        let mut scores = vec![0f32; pairs.len()];
        for (query, positions) in groups {
            let documents = positions
                .iter()
                .map(|position| pairs[*position].1.as_str())
                .collect::<Vec<_>>();
            let group_scores = self.rerank_group(query, &documents).await?;
            for (position, score) in positions.into_iter().zip(group_scores) {
                scores[position] = score;
            }
        }
        Ok(scores)
    }
}

fn scores_in_input_order(parsed: &Value, expected: usize) -> Result<Vec<f32>, ProviderError> {
    let results = parsed
        .pointer("/results")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::backend("rerank", "missing results"))?;
    if results.len() != expected {
        return Err(ProviderError::backend(
            "rerank",
            format!("expected {expected} scores, got {}", results.len()),
        ));
    }

    let mut scores = vec![None; expected];
    for result in results {
        let index = result.pointer("/index").and_then(Value::as_u64);
        let score = result.pointer("/relevance_score").and_then(Value::as_f64);
        match (index, score) {
            (Some(index), Some(score)) if (index as usize) < expected => {
                scores[index as usize] = Some(score as f32);
            }
            _ => return Err(ProviderError::backend("rerank", "malformed result entry")),
        }
    }

    scores
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| ProviderError::backend("rerank", "duplicate result index"))
}
