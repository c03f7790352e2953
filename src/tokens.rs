//! Token Accounting
//!
//! Deterministic token estimation and prompt trimming. Counting is a pure
//! function of the input; trimming drops whole turn segments oldest-first
//! and never drops system messages, the most recent user message, or a
//! tool-call group that belongs to the current turn.

use crate::error::{CoreError, Result};
use crate::types::{ChatMessage, ChatRole};

/// Fixed per-message overhead (role framing, separators) in the estimate.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Tokens reserved for the model's response when fitting a prompt.
pub const RESPONSE_RESERVE_TOKENS: usize = 1024;

/// Counts tokens for arbitrary message content against a named model.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str, model: &str) -> usize;

    fn count_message(&self, message: &ChatMessage, model: &str) -> usize {
        let mut total = MESSAGE_OVERHEAD_TOKENS + self.count_text(&message.content, model);
        if let Some(calls) = &message.tool_calls {
            for call in calls {
                total += MESSAGE_OVERHEAD_TOKENS
                    + self.count_text(&call.function.name, model)
                    + self.count_text(&call.function.arguments, model);
            }
        }
        total
    }

    fn count_messages(&self, messages: &[ChatMessage], model: &str) -> usize {
        messages.iter().map(|m| self.count_message(m, model)).sum()
    }
}

/// Character-ratio estimator: roughly four bytes per token for English-ish
/// prose, rounded up. Stable across calls by construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_text(&self, text: &str, _model: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// Context-window size for a named model. Unknown models get a conservative
/// default.
pub fn context_window(model: &str) -> usize {
    match model {
        m if m.starts_with("gpt-4o") => 128_000,
        m if m.starts_with("gpt-4.1") => 1_000_000,
        m if m.starts_with("gpt-4") => 8_192,
        m if m.starts_with("gpt-3.5") => 16_384,
        m if m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") => 200_000,
        m if m.starts_with("claude") => 200_000,
        _ => 8_192,
    }
}

/// Trim `messages` so that their token count plus the response reserve fits
/// within `budget`. System messages are pinned; everything else is grouped
/// into turn segments (a user message and all that follows until the next
/// user message) and dropped oldest-first as whole segments, which keeps
/// tool-call groups intact. The final segment is mandatory.
pub fn fit(
    messages: &[ChatMessage],
    counter: &dyn TokenCounter,
    model: &str,
    budget: usize,
) -> Result<Vec<ChatMessage>> {
    let mut system: Vec<ChatMessage> = Vec::new();
    let mut segments: Vec<Vec<ChatMessage>> = Vec::new();

    for message in messages {
        if message.role == ChatRole::System {
            system.push(message.clone());
            continue;
        }
        if message.role == ChatRole::User || segments.is_empty() {
            segments.push(Vec::new());
        }
        if let Some(segment) = segments.last_mut() {
            segment.push(message.clone());
        }
    }

    let assemble = |keep_from: usize| -> Vec<ChatMessage> {
        let mut out = system.clone();
        for segment in &segments[keep_from..] {
            out.extend(segment.iter().cloned());
        }
        out
    };

    let last = segments.len().saturating_sub(1);
    for keep_from in 0..=last {
        let candidate = assemble(keep_from);
        let needed = counter.count_messages(&candidate, model) + RESPONSE_RESERVE_TOKENS;
        if needed <= budget {
            return Ok(candidate);
        }
        if keep_from == last {
            // even the mandatory retained set does not fit
            return Err(CoreError::Unfittable { needed, budget });
        }
    }

    // no segments at all: just the system messages
    let candidate = assemble(0);
    let needed = counter.count_messages(&candidate, model) + RESPONSE_RESERVE_TOKENS;
    if needed <= budget {
        Ok(candidate)
    } else {
        Err(CoreError::Unfittable { needed, budget })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WireToolCall, WireToolCallFunction};

    fn msg(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage::text(role, content)
    }

    #[test]
    fn test_count_is_deterministic() {
        let counter = HeuristicTokenCounter;
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(
            counter.count_text(text, "gpt-4o"),
            counter.count_text(text, "gpt-4o")
        );
        assert_eq!(counter.count_text("abcd", "gpt-4o"), 1);
        assert_eq!(counter.count_text("abcde", "gpt-4o"), 2);
    }

    #[test]
    fn test_count_message_includes_tool_calls() {
        let counter = HeuristicTokenCounter;
        let plain = msg(ChatRole::Assistant, "");
        let mut with_calls = plain.clone();
        with_calls.tool_calls = Some(vec![WireToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: WireToolCallFunction {
                name: "web_search".into(),
                arguments: r#"{"query":"rust"}"#.into(),
            },
        }]);
        assert!(
            counter.count_message(&with_calls, "gpt-4o")
                > counter.count_message(&plain, "gpt-4o")
        );
    }

    #[test]
    fn test_fit_keeps_everything_when_it_fits() {
        let messages = vec![
            msg(ChatRole::System, "be concise"),
            msg(ChatRole::User, "hello"),
            msg(ChatRole::Assistant, "hi"),
            msg(ChatRole::User, "bye"),
        ];
        let fitted = fit(&messages, &HeuristicTokenCounter, "gpt-4o", 100_000).unwrap();
        assert_eq!(fitted.len(), 4);
    }

    #[test]
    fn test_fit_drops_oldest_turn_first() {
        let old_turn_user = msg(ChatRole::User, &"x".repeat(8_000));
        let old_turn_reply = msg(ChatRole::Assistant, &"y".repeat(8_000));
        let messages = vec![
            msg(ChatRole::System, "be concise"),
            old_turn_user,
            old_turn_reply,
            msg(ChatRole::User, "latest question"),
        ];
        let budget = RESPONSE_RESERVE_TOKENS + 200;
        let fitted = fit(&messages, &HeuristicTokenCounter, "gpt-4o", budget).unwrap();
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted[0].role, ChatRole::System);
        assert_eq!(fitted[1].content, "latest question");
    }

    #[test]
    fn test_fit_keeps_tool_group_with_current_turn() {
        let mut call_msg = msg(ChatRole::Assistant, "");
        call_msg.tool_calls = Some(vec![WireToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: WireToolCallFunction {
                name: "compute".into(),
                arguments: "{}".into(),
            },
        }]);
        let mut result_msg = msg(ChatRole::Tool, "391");
        result_msg.tool_call_id = Some("call_1".into());

        let messages = vec![
            msg(ChatRole::User, &"old ".repeat(4_000)),
            msg(ChatRole::Assistant, "old answer"),
            msg(ChatRole::User, "17*23?"),
            call_msg,
            result_msg,
        ];
        let budget = RESPONSE_RESERVE_TOKENS + 100;
        let fitted = fit(&messages, &HeuristicTokenCounter, "gpt-4o", budget).unwrap();
        // the whole current turn survives: user + folded call + result
        assert_eq!(fitted.len(), 3);
        assert_eq!(fitted[0].content, "17*23?");
        assert!(fitted[1].tool_calls.is_some());
    }

    #[test]
    fn test_fit_unfittable_when_mandatory_set_too_large() {
        let messages = vec![
            msg(ChatRole::System, "be concise"),
            msg(ChatRole::User, &"z".repeat(100_000)),
        ];
        let err = fit(
            &messages,
            &HeuristicTokenCounter,
            "gpt-4o",
            RESPONSE_RESERVE_TOKENS + 100,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Unfittable { .. }));
    }

    #[test]
    fn test_context_window_registry() {
        assert_eq!(context_window("gpt-4o"), 128_000);
        assert_eq!(context_window("gpt-4o-mini"), 128_000);
        assert_eq!(context_window("something-unknown"), 8_192);
    }
}
