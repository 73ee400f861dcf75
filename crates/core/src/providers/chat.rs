use crate::traits::CompletionModel;
use crate::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible `/chat/completions` client (Together, vLLM, llama.cpp server...).
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::http_client(DEFAULT_CHAT_TIMEOUT)?,
            endpoint: super::endpoint(base_url, "chat/completions")?,
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionModel for ChatCompletionsClient {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::backend("chat", response.status().to_string()));
        }

        let parsed: Value = response.json().await?;
        message_content(&parsed)
    }
}

fn message_content(parsed: &Value) -> Result<String, ProviderError> {
    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::backend("chat", "missing choices[0].message.content"))
}
