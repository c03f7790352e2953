//! Error taxonomy for the conversation log core.
//!
//! Structural errors are fatal to the attempted operation and never silently
//! repaired. Tool-level errors are non-fatal to a turn: the dispatch loop
//! records them as tool_result content so the model can react.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Structural ──
    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("role sequence violation: {0}")]
    SequenceViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // ── Capacity ──
    #[error("mandatory messages exceed the context budget of {budget} tokens ({needed} needed)")]
    Unfittable { needed: usize, budget: usize },

    // ── Tool-level ──
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool {tool} failed: {source}")]
    ExecutionFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    // ── Loop-control ──
    #[error("tool loop exceeded {0} rounds without a final answer")]
    ToolLoopExceeded(u32),

    // ── Transport / persistence ──
    #[error("model API error at {stage}: {message}")]
    Api { stage: &'static str, message: String },

    #[error("transport failure at {stage}: {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the failure is transient at the transport layer and therefore
    /// eligible for bounded retry. Validation and application errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transport { .. })
    }

    /// The stage a failure occurred at, for user-facing reporting. The
    /// conversation is always safely resumable: partial chains are valid.
    pub fn stage(&self) -> &'static str {
        match self {
            CoreError::InvalidParent(_)
            | CoreError::SequenceViolation(_)
            | CoreError::NotFound(_)
            | CoreError::Storage(_) => "persistence",
            CoreError::Unfittable { .. } => "prompt building",
            CoreError::UnknownTool(_)
            | CoreError::InvalidArguments { .. }
            | CoreError::ExecutionFailed { .. } => "tool execution",
            CoreError::ToolLoopExceeded(_) => "dispatch loop",
            CoreError::Api { stage, .. } | CoreError::Transport { stage, .. } => stage,
            CoreError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_transient() {
        assert!(!CoreError::NotFound("x".into()).is_transient());
        assert!(!CoreError::ToolLoopExceeded(5).is_transient());
        assert!(!CoreError::UnknownTool("t".into()).is_transient());
    }

    #[test]
    fn test_stage_reporting() {
        assert_eq!(CoreError::InvalidParent("p".into()).stage(), "persistence");
        assert_eq!(CoreError::ToolLoopExceeded(5).stage(), "dispatch loop");
        assert_eq!(
            CoreError::UnknownTool("t".into()).stage(),
            "tool execution"
        );
    }
}
