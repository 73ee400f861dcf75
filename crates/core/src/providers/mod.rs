pub mod chat;
pub mod rerank;

pub use chat::ChatCompletionsClient;
pub use rerank::HttpReranker;

use crate::ProviderError;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Whole-request timeout for embedding, search and rerank calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Joins `path` under `base_url`, keeping every segment of the base.
pub(crate) fn endpoint(base_url: &str, path: &str) -> Result<Url, ProviderError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path)?)
}
