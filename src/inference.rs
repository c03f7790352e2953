//! Chat Inference Client
//!
//! Wraps an OpenAI-compatible /v1/chat/completions endpoint. Transient
//! transport failures are retried with jittered exponential backoff per the
//! configured policy; HTTP and application errors are surfaced immediately.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::types::{
    ChatMessage, InferenceClient, InferenceResponse, RetryPolicy, TokenUsage, ToolDefinition,
    WireToolCall, WireToolCallFunction,
};

pub struct OpenAiChatClient {
    api_url: String,
    api_key: String,
    max_response_tokens: u32,
    retry: RetryPolicy,
    http: Client,
}

impl OpenAiChatClient {
    /// * `api_url` - Base URL of the chat API (e.g. `https://api.openai.com`).
    /// * `api_key` - Bearer token.
    /// * `max_response_tokens` - Completion token cap per request.
    pub fn new(
        api_url: String,
        api_key: String,
        max_response_tokens: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api_url,
            api_key,
            max_response_tokens,
            retry,
            http: Client::new(),
        }
    }

    fn build_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition], model: &str) -> Value {
        // Newer models (o-series, gpt-5.x, gpt-4.1) use max_completion_tokens
        let uses_completion_tokens = regex::Regex::new(r"^(o[1-9]|gpt-5|gpt-4\.1)")
            .map(|re| re.is_match(model))
            .unwrap_or(false);

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(self.max_response_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(self.max_response_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    async fn send_once(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/v1/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|source| CoreError::Transport {
                stage: "model call",
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Api {
                stage: "model call",
                message: format!("{}: {}", status.as_u16(), text),
            });
        }

        resp.json().await.map_err(|source| CoreError::Transport {
            stage: "model call",
            source,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<InferenceResponse> {
        let body = self.build_body(messages, tools, model);

        let mut attempt = 0u32;
        let data = loop {
            match self.send_once(&body).await {
                Ok(data) => break data,
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_ms(attempt);
                    warn!(attempt, delay_ms = delay, error = %err, "model call failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err),
            }
        };

        let response = parse_response(&data, model)?;
        info!(
            model = %response.model,
            tool_calls = response.tool_calls.len(),
            total_tokens = response.usage.total_tokens,
            "model responded"
        );
        Ok(response)
    }
}

/// Parse a chat-completions payload into a typed response.
fn parse_response(data: &Value, requested_model: &str) -> Result<InferenceResponse> {
    let choice = data["choices"].get(0).ok_or_else(|| CoreError::Api {
        stage: "model call",
        message: "no completion choice returned".to_string(),
    })?;

    let message = &choice["message"];

    let tool_calls: Vec<WireToolCall> = message["tool_calls"]
        .as_array()
        .map(|tcs| {
            tcs.iter()
                .map(|tc| WireToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: "function".to_string(),
                    function: WireToolCallFunction {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        id: data["id"].as_str().unwrap_or("").to_string(),
        model: data["model"].as_str().unwrap_or(requested_model).to_string(),
        content: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls,
        usage: TokenUsage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: data["usage"]["total_tokens"].as_u64().unwrap_or(0),
        },
        finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_final_answer() {
        let data = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 1, "total_tokens": 11}
        });
        let resp = parse_response(&data, "gpt-4o").unwrap();
        assert_eq!(resp.content, "4");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.total_tokens, 11);
        assert_eq!(resp.finish_reason, "stop");
    }

    #[test]
    fn test_parse_tool_calls() {
        let data = json!({
            "id": "chatcmpl-2",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "web_search", "arguments": "{\"query\":\"rome\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28}
        });
        let resp = parse_response(&data, "gpt-4o").unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_a");
        assert_eq!(resp.tool_calls[0].function.name, "web_search");
        assert_eq!(resp.finish_reason, "tool_calls");
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let data = json!({"choices": []});
        assert!(matches!(
            parse_response(&data, "gpt-4o").unwrap_err(),
            CoreError::Api { .. }
        ));
    }

    #[test]
    fn test_body_token_field_by_model_family() {
        let client = OpenAiChatClient::new(
            "https://api.example.com".into(),
            "key".into(),
            512,
            RetryPolicy::default(),
        );
        let body = client.build_body(&[], &[], "gpt-4o");
        assert!(body.get("max_tokens").is_some());
        let body = client.build_body(&[], &[], "gpt-4.1-mini");
        assert!(body.get("max_completion_tokens").is_some());
        let body = client.build_body(&[], &[], "o3-mini");
        assert!(body.get("max_completion_tokens").is_some());
    }

    #[test]
    fn test_tools_included_only_when_present() {
        let client = OpenAiChatClient::new(
            "https://api.example.com".into(),
            "key".into(),
            512,
            RetryPolicy::default(),
        );
        let body = client.build_body(&[], &[], "gpt-4o");
        assert!(body.get("tools").is_none());
    }
}
