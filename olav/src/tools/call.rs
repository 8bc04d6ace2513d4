//! Tool call record: one invocation of a registered tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a tool call.
///
/// Created `PendingApproval` (gated) or `Running` (no gate); terminal states are
/// `Succeeded`, `Failed`, `Rejected`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    PendingApproval,
    Running,
    Succeeded,
    Failed,
    Rejected,
    Cancelled,
}

/// One invocation of a tool, tracked in workflow state and checkpointed with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    /// A fresh call ready to run (no approval gate).
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Running,
            result: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// A call held at the approval gate before any side effect.
    pub fn pending_approval(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            status: ToolCallStatus::PendingApproval,
            ..Self::new(tool_name, arguments)
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ToolCallStatus::Succeeded
                | ToolCallStatus::Failed
                | ToolCallStatus::Rejected
                | ToolCallStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: Fresh calls get a unique id and the expected initial status.
    #[test]
    fn constructors_set_status() {
        let a = ToolCall::new("smart_query", json!({}));
        let b = ToolCall::pending_approval("apply_config", json!({}));
        assert_eq!(a.status, ToolCallStatus::Running);
        assert_eq!(b.status, ToolCallStatus::PendingApproval);
        assert_ne!(a.call_id, b.call_id);
        assert!(!a.is_terminal());
        assert!(!b.is_terminal());
    }

    /// **Scenario**: Terminal detection covers all four terminal states.
    #[test]
    fn terminal_states() {
        let mut call = ToolCall::new("x", json!({}));
        for status in [
            ToolCallStatus::Succeeded,
            ToolCallStatus::Failed,
            ToolCallStatus::Rejected,
            ToolCallStatus::Cancelled,
        ] {
            call.status = status;
            assert!(call.is_terminal());
        }
    }
}
