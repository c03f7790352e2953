//! Conversation Reconstruction
//!
//! Replays a record chain into the message sequence the chat API expects.
//! Replay is deterministic and order-preserving: the same chain always
//! yields the same messages.

use crate::types::{
    ChatMessage, ChatRole, DisplayTurn, PendingToolCall, Record, RecordRole, WireToolCall,
    WireToolCallFunction,
};

/// In-memory view over one chain of records.
pub struct ConversationModel {
    chain: Vec<Record>,
}

impl ConversationModel {
    /// `chain` must be oldest-first, as returned by `LogStore::chain`.
    pub fn new(chain: Vec<Record>) -> Self {
        Self { chain }
    }

    pub fn records(&self) -> &[Record] {
        &self.chain
    }

    /// The message sequence for the chat API. Runs of consecutive
    /// `tool_call` records fold into a single assistant message carrying
    /// structured call metadata; `tool_result` records become `tool`-role
    /// messages correlated by call id.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut i = 0;

        while i < self.chain.len() {
            let record = &self.chain[i];
            match record.role {
                RecordRole::System => {
                    messages.push(ChatMessage::text(ChatRole::System, record.content.clone()));
                    i += 1;
                }
                RecordRole::User => {
                    messages.push(ChatMessage::text(ChatRole::User, record.content.clone()));
                    i += 1;
                }
                RecordRole::Assistant => {
                    messages.push(ChatMessage::text(
                        ChatRole::Assistant,
                        record.content.clone(),
                    ));
                    i += 1;
                }
                RecordRole::ToolCall => {
                    // fold the whole run of calls into one assistant message
                    let mut calls: Vec<WireToolCall> = Vec::new();
                    while i < self.chain.len() && self.chain[i].role == RecordRole::ToolCall {
                        let r = &self.chain[i];
                        calls.push(WireToolCall {
                            id: r.tool_call_id.clone().unwrap_or_default(),
                            call_type: "function".to_string(),
                            function: WireToolCallFunction {
                                name: r.tool_name.clone().unwrap_or_default(),
                                arguments: r.content.clone(),
                            },
                        });
                        i += 1;
                    }
                    messages.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: String::new(),
                        tool_calls: Some(calls),
                        tool_call_id: None,
                    });
                }
                RecordRole::ToolResult => {
                    messages.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: record.content.clone(),
                        tool_calls: None,
                        tool_call_id: record.tool_call_id.clone(),
                    });
                    i += 1;
                }
            }
        }

        messages
    }

    /// Tool calls in this chain without a matching result, oldest first.
    /// Non-empty on an existing leaf means the previous turn was interrupted
    /// mid-dispatch and should resume by executing only these.
    pub fn pending_tool_calls(&self) -> Vec<PendingToolCall> {
        pending_tool_calls(&self.chain)
    }

    /// The last `user` record of the chain, if any.
    pub fn last_user_record(&self) -> Option<&Record> {
        self.chain.iter().rev().find(|r| r.role == RecordRole::User)
    }

    /// Display-ready turns for `show`/`history`: user, assistant and system
    /// text plus a one-line note per tool invocation.
    pub fn display_turns(&self) -> Vec<DisplayTurn> {
        self.chain
            .iter()
            .map(|r| {
                let text = match r.role {
                    RecordRole::ToolCall => format!(
                        "{}({})",
                        r.tool_name.as_deref().unwrap_or("?"),
                        r.content
                    ),
                    _ => r.content.clone(),
                };
                DisplayTurn { role: r.role, text }
            })
            .collect()
    }
}

/// Unresolved tool calls in a chain (oldest-first).
pub fn pending_tool_calls(chain: &[Record]) -> Vec<PendingToolCall> {
    let mut pending: Vec<PendingToolCall> = Vec::new();
    for record in chain {
        match record.role {
            RecordRole::ToolCall => {
                if let Some(call_id) = &record.tool_call_id {
                    pending.push(PendingToolCall {
                        call_id: call_id.clone(),
                        tool_name: record.tool_name.clone().unwrap_or_default(),
                        arguments: record.content.clone(),
                    });
                }
            }
            RecordRole::ToolResult => {
                if let Some(call_id) = &record.tool_call_id {
                    pending.retain(|p| p.call_id != *call_id);
                }
            }
            _ => {}
        }
    }
    pending
}
