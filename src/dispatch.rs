//! The Dispatch Loop
//!
//! Drives one user turn to completion: append the user record, call the
//! model with a budget-fitted prompt, execute any requested tools, fold the
//! results back into the log, and repeat until a final answer lands or the
//! round cap trips. Every intermediate record is durably appended, so an
//! interrupted turn resumes from exactly the unresolved tool calls.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use crate::conversation::ConversationModel;
use crate::error::{CoreError, Result};
use crate::log::LogStore;
use crate::tokens::{context_window, fit, TokenCounter};
use crate::tools::ToolRegistry;
use crate::types::{
    ConversationEntry, DisplayTurn, InferenceClient, InferenceResponse, Record, RecordDraft,
    RecordRole, TokenUsage,
};

/// Turn-level knobs for the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    pub model: String,
    /// Cap on CALL_MODEL <-> EXECUTE_TOOLS cycles per user turn.
    pub max_tool_rounds: u32,
    /// Prompt token budget; defaults to the model's context window.
    pub context_budget: Option<usize>,
    /// Instruction message appended as the root of new conversations.
    pub system_prompt: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tool_rounds: 5,
            context_budget: None,
            system_prompt: None,
        }
    }
}

/// Orchestrates turns over one log store. Conversation identity is threaded
/// through every call; there is no ambient "current conversation".
pub struct Dispatcher {
    store: LogStore,
    inference: Arc<dyn InferenceClient>,
    registry: ToolRegistry,
    counter: Box<dyn TokenCounter>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        store: LogStore,
        inference: Arc<dyn InferenceClient>,
        registry: ToolRegistry,
        counter: Box<dyn TokenCounter>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            inference,
            registry,
            counter,
            options,
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Run one user turn against `conversation`, creating it if needed, and
    /// return the final assistant answer.
    ///
    /// If the existing leaf carries unresolved tool calls (a previous process
    /// died mid-dispatch), the turn resumes by executing only those calls;
    /// `user_text` is not appended again.
    pub async fn start_or_continue(&self, conversation: &str, user_text: &str) -> Result<String> {
        let mut leaf = match self.store.conversation(conversation)? {
            Some(entry) => {
                let chain = self.store.chain(&entry.leaf_id)?;
                let pending = crate::conversation::pending_tool_calls(&chain);
                if pending.is_empty() {
                    self.store
                        .append(
                            conversation,
                            &RecordDraft::new(
                                Some(entry.leaf_id),
                                RecordRole::User,
                                user_text,
                            ),
                        )?
                        .id
                } else {
                    warn!(
                        conversation,
                        pending = pending.len(),
                        "resuming interrupted turn; user input deferred"
                    );
                    entry.leaf_id
                }
            }
            None => {
                let mut parent: Option<String> = None;
                if let Some(prompt) = &self.options.system_prompt {
                    let root = self.store.append(
                        conversation,
                        &RecordDraft::new(None, RecordRole::System, prompt.clone()),
                    )?;
                    parent = Some(root.id);
                }
                self.store
                    .append(
                        conversation,
                        &RecordDraft::new(parent, RecordRole::User, user_text),
                    )?
                    .id
            }
        };

        let mut rounds_used = 0u32;

        loop {
            let chain = self.store.chain(&leaf)?;
            let model_view = ConversationModel::new(chain);
            let pending = model_view.pending_tool_calls();

            if !pending.is_empty() {
                leaf = self.execute_tools(conversation, &leaf, &pending).await?;
                rounds_used += 1;
                continue;
            }

            if rounds_used >= self.options.max_tool_rounds {
                return Err(CoreError::ToolLoopExceeded(self.options.max_tool_rounds));
            }

            let response = self.call_model(&model_view).await?;

            if response.tool_calls.is_empty() {
                let final_record = self.store.append(
                    conversation,
                    &RecordDraft {
                        parent_id: Some(leaf),
                        role: RecordRole::Assistant,
                        content: response.content.clone(),
                        tool_name: None,
                        tool_call_id: None,
                        metadata: usage_metadata(&response.model, &response.usage),
                    },
                )?;
                info!(conversation, id = %final_record.id, "turn complete");
                return Ok(response.content);
            }

            // one tool_call record per requested call, linked in sequence
            for (idx, call) in response.tool_calls.iter().enumerate() {
                let call_id = if call.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4())
                } else {
                    call.id.clone()
                };
                let metadata = if idx == 0 {
                    usage_metadata(&response.model, &response.usage)
                } else {
                    json!({})
                };
                let record = self.store.append(
                    conversation,
                    &RecordDraft {
                        parent_id: Some(leaf),
                        role: RecordRole::ToolCall,
                        content: call.function.arguments.clone(),
                        tool_name: Some(call.function.name.clone()),
                        tool_call_id: Some(call_id),
                        metadata,
                    },
                )?;
                leaf = record.id;
            }
        }
    }

    /// Display-ready turns for a conversation.
    pub fn history(&self, conversation: &str) -> Result<Vec<DisplayTurn>> {
        let leaf = self.store.latest_leaf(conversation)?;
        let chain = self.store.chain(&leaf)?;
        Ok(ConversationModel::new(chain).display_turns())
    }

    /// Branch a new conversation off a record in an existing chain.
    pub fn fork(
        &self,
        conversation: &str,
        at_record_id: &str,
        new_name: &str,
    ) -> Result<ConversationEntry> {
        let leaf = self.store.latest_leaf(conversation)?;
        let chain = self.store.chain(&leaf)?;
        if !chain.iter().any(|r| r.id == at_record_id) {
            return Err(CoreError::NotFound(format!(
                "record {at_record_id} is not in conversation '{conversation}'"
            )));
        }
        self.store.fork(at_record_id, new_name)
    }

    // ─── State machine internals ────────────────────────────────

    async fn call_model(&self, view: &ConversationModel) -> Result<InferenceResponse> {
        let messages = view.messages();
        let budget = self
            .options
            .context_budget
            .unwrap_or_else(|| context_window(&self.options.model));
        let fitted = fit(&messages, self.counter.as_ref(), &self.options.model, budget)?;
        info!(
            messages = fitted.len(),
            dropped = messages.len() - fitted.len(),
            "calling model"
        );
        self.inference
            .chat(&fitted, &self.registry.definitions(), &self.options.model)
            .await
    }

    /// Execute every unresolved call and append one tool_result each.
    /// Tool-level failures become error content the model can react to;
    /// they never abort the turn.
    async fn execute_tools(
        &self,
        conversation: &str,
        leaf: &str,
        pending: &[crate::types::PendingToolCall],
    ) -> Result<String> {
        let mut leaf = leaf.to_string();
        for call in pending {
            let started = Instant::now();
            let arguments: serde_json::Value =
                serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));

            let outcome = self.registry.invoke(&call.tool_name, &arguments).await;
            let (content, errored) = match outcome {
                Ok(result) => (result, false),
                Err(err) => {
                    warn!(tool = %call.tool_name, error = %err, "tool failed");
                    (format!("Error: {err}"), true)
                }
            };

            let record = self.store.append(
                conversation,
                &RecordDraft {
                    parent_id: Some(leaf),
                    role: RecordRole::ToolResult,
                    content,
                    tool_name: Some(call.tool_name.clone()),
                    tool_call_id: Some(call.call_id.clone()),
                    metadata: json!({
                        "duration_ms": started.elapsed().as_millis() as u64,
                        "error": errored,
                    }),
                },
            )?;
            leaf = record.id;
        }
        Ok(leaf)
    }
}

fn usage_metadata(model: &str, usage: &TokenUsage) -> serde_json::Value {
    json!({
        "model": model,
        "usage": {
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        }
    })
}

/// Sum the token usage recorded across a set of records.
pub fn usage_totals(records: &[Record]) -> TokenUsage {
    let mut total = TokenUsage::default();
    for record in records {
        let usage = &record.metadata["usage"];
        total.prompt_tokens += usage["prompt_tokens"].as_u64().unwrap_or(0);
        total.completion_tokens += usage["completion_tokens"].as_u64().unwrap_or(0);
        total.total_tokens += usage["total_tokens"].as_u64().unwrap_or(0);
    }
    total
}
