//! Computational Lookup Tool Service
//!
//! Backed by the WolframAlpha short-answers API, which returns a single
//! plain-text line for a computational or factual query.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::types::ComputeClient;

const DEFAULT_API_URL: &str = "https://api.wolframalpha.com/v1/result";

pub struct WolframComputeClient {
    api_url: String,
    app_id: String,
    http: Client,
}

impl WolframComputeClient {
    pub fn new(app_id: String) -> Self {
        Self::with_api_url(DEFAULT_API_URL.to_string(), app_id)
    }

    pub fn with_api_url(api_url: String, app_id: String) -> Self {
        Self {
            api_url,
            app_id,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl ComputeClient for WolframComputeClient {
    async fn compute(&self, query: &str) -> Result<String> {
        if self.app_id.is_empty() {
            anyhow::bail!("compute service not configured: missing app id");
        }

        let url = format!(
            "{}?appid={}&i={}",
            self.api_url,
            urlencoding::encode(&self.app_id),
            urlencoding::encode(query)
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("compute request failed for query: {query}"))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        // the short-answers API uses 501 for "no short answer available"
        if status.as_u16() == 501 {
            anyhow::bail!("no short answer available for: {query}");
        }
        if !status.is_success() {
            anyhow::bail!("compute API error: {}: {}", status.as_u16(), text);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_app_id_fails_before_network() {
        let client = WolframComputeClient::new(String::new());
        let err = client.compute("17*23").await.unwrap_err();
        assert!(err.to_string().contains("missing app id"));
    }
}
