use crate::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Converts text to a unit-norm vector. Distance thresholds assume the norm is 1.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Hashed character-trigram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let folded = crate::lexical::fold(text);
        let chars: Vec<char> = folded.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        // Terms shorter than a trigram hash as a single token.
        if chars.len() < 3 {
            let bucket = bucket_of(&folded, vector.len());
            vector[bucket] += 1.0;
        }
        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = bucket_of(&token, vector.len());
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

fn bucket_of(token: &str, buckets: usize) -> usize {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % buckets as u64) as usize
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let vector = self.embed_sync(text);
        if vector.iter().all(|value| *value == 0.0) {
            return Err(ProviderError::Request(format!("nothing to embed in '{text}'")));
        }
        Ok(vector)
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: crate::providers::http_client(crate::providers::DEFAULT_REQUEST_TIMEOUT)?,
            endpoint: crate::providers::endpoint(base_url, "embeddings")?,
            api_key,
            model: model.into(),
            dimensions,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = crate::providers::http_client(timeout)?;
        Ok(self)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "model": self.model, "input": [text] }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::backend("embeddings", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        let mut vector = parsed
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::backend("embeddings", "missing data[0].embedding"))?
            .iter()
            .map(|value| value.as_f64().map(|number| number as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| ProviderError::backend("embeddings", "non-numeric embedding value"))?;

        if vector.len() != self.dimensions {
            return Err(ProviderError::Request(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.dimensions
            )));
        }

        normalize(&mut vector);
        Ok(vector)
    }
}
