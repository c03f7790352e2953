//! Web Search Tool Service
//!
//! Backed by the DuckDuckGo Instant Answer API. Translates the provider's
//! wire format into the plain-text result the registry contract expects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::types::SearchClient;

const DEFAULT_API_URL: &str = "https://api.duckduckgo.com";

/// How many related topics to include when no abstract is available.
const MAX_RELATED_TOPICS: usize = 3;

pub struct DuckDuckGoSearchClient {
    api_url: String,
    http: Client,
}

impl DuckDuckGoSearchClient {
    pub fn new() -> Self {
        Self::with_api_url(DEFAULT_API_URL.to_string())
    }

    pub fn with_api_url(api_url: String) -> Self {
        Self {
            api_url,
            http: Client::new(),
        }
    }
}

impl Default for DuckDuckGoSearchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchClient for DuckDuckGoSearchClient {
    async fn search(&self, query: &str) -> Result<String> {
        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.api_url,
            urlencoding::encode(query)
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("search request failed for query: {query}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("search API error: {}: {}", status.as_u16(), text);
        }

        let data: Value = resp
            .json()
            .await
            .context("failed to parse search response")?;

        Ok(summarize(&data, query))
    }
}

/// Pick the most useful text out of an instant-answer payload: direct answer
/// first, then the abstract, then related-topic snippets.
fn summarize(data: &Value, query: &str) -> String {
    if let Some(answer) = data["Answer"].as_str() {
        if !answer.is_empty() {
            return answer.to_string();
        }
    }

    if let Some(abstract_text) = data["AbstractText"].as_str() {
        if !abstract_text.is_empty() {
            let source = data["AbstractURL"].as_str().unwrap_or_default();
            return if source.is_empty() {
                abstract_text.to_string()
            } else {
                format!("{abstract_text} (source: {source})")
            };
        }
    }

    let topics: Vec<String> = data["RelatedTopics"]
        .as_array()
        .map(|ts| {
            ts.iter()
                .filter_map(|t| t["Text"].as_str())
                .filter(|t| !t.is_empty())
                .take(MAX_RELATED_TOPICS)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if topics.is_empty() {
        format!("No results found for: {query}")
    } else {
        topics.join("\n")
    }
}
