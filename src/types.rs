//! Chatvine - Type Definitions
//!
//! Shared types for the append-only conversation log and the dispatch loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Log Records ─────────────────────────────────────────────────

/// The role of a record in the conversation log.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

impl RecordRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordRole::User => "user",
            RecordRole::Assistant => "assistant",
            RecordRole::ToolCall => "tool_call",
            RecordRole::ToolResult => "tool_result",
            RecordRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(RecordRole::User),
            "assistant" => Some(RecordRole::Assistant),
            "tool_call" => Some(RecordRole::ToolCall),
            "tool_result" => Some(RecordRole::ToolResult),
            "system" => Some(RecordRole::System),
            _ => None,
        }
    }
}

/// One immutable entry in the append-only log. Records are never mutated or
/// deleted after append; history is reconstructed by walking `parent_id`
/// links back to the root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub parent_id: Option<String>,
    pub role: RecordRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: String,
    pub metadata: serde_json::Value,
}

/// Everything the caller supplies for an append; the store assigns `id` and
/// `created_at` and validates `parent_id` against the conversation tip.
#[derive(Clone, Debug)]
pub struct RecordDraft {
    pub parent_id: Option<String>,
    pub role: RecordRole,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl RecordDraft {
    pub fn new(parent_id: Option<String>, role: RecordRole, content: impl Into<String>) -> Self {
        Self {
            parent_id,
            role,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
            metadata: serde_json::json!({}),
        }
    }
}

/// A named conversation: a pointer to the leaf record of a chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub name: String,
    pub leaf_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A tool call present in a chain without a matching tool result yet.
/// Detecting these on the existing leaf is how an interrupted turn resumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// One display-ready entry of a conversation, as rendered by `show`/`history`.
#[derive(Clone, Debug, Serialize)]
pub struct DisplayTurn {
    pub role: RecordRole,
    pub text: String,
}

// ─── Chat Wire Types ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the shape the chat-completions API expects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireToolCallFunction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Parsed chat-completions response: either final text or tool-call requests.
#[derive(Clone, Debug)]
pub struct InferenceResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub tool_calls: Vec<WireToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolDefinitionFunction,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolDefinitionFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ─── Client Interfaces ───────────────────────────────────────────

/// The language-model API boundary. Request = messages + tool schemas + model;
/// response = final text or structured tool-call requests.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
    ) -> crate::error::Result<InferenceResponse>;
}

/// Web search service boundary.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<String>;
}

/// Computational-knowledge lookup boundary.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn compute(&self, query: &str) -> anyhow::Result<String>;
}

// ─── Retry Policy ────────────────────────────────────────────────

/// Bounded retry with exponential backoff for transient transport failures.
/// Never applied to validation or application errors.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), with jitter.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        use rand::Rng;
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_delay_ms).max(1);
        // jitter in [capped/2, capped]
        rand::thread_rng().gen_range(capped / 2..=capped)
    }
}
