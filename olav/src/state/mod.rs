//! Workflow state: the single typed value that flows through every graph.
//!
//! Every workflow shares [`WorkflowState`]: conversation `messages`, the round's
//! `tool_calls`, the loop-safety `iteration_count`, optional fan-out `progress`,
//! and a named `scratch` area for node-to-node data. The state serializes to the
//! checkpoint blob; [`STATE_SCHEMA_VERSION`] makes incompatible blobs fail fast
//! on load instead of misbehaving.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::interrupt::ResumeDecision;
use crate::message::Message;
use crate::tools::ToolCall;

/// Current version of the serialized state layout.
pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// Fan-out progress: devices completed out of total. Monotone non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// State for every workflow graph: messages + tool calls + iteration bound,
/// plus a scratch map for intermediate node outputs (plans, classifications,
/// fan-out results). Satisfies `Clone + Send + Sync + 'static` for
/// `Node<WorkflowState>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Serialized-layout version; checked when loading a checkpoint blob.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Conversation history. Append-only within a run.
    pub messages: Vec<Message>,
    /// Tool calls of the current round, including any pending approval.
    pub tool_calls: Vec<ToolCall>,
    /// Loop-safety counter; incremented by looping nodes, enforced by the engine.
    #[serde(default)]
    pub iteration_count: u32,
    /// Fan-out progress, present for inspection runs.
    #[serde(default)]
    pub progress: Option<Progress>,
    /// Named intermediate values (classification, plan, per-device outcomes).
    #[serde(default)]
    pub scratch: serde_json::Map<String, Value>,
    /// The decision injected on resume; consumed by the approval-gate node and
    /// cleared once acted on. Never reset implicitly.
    #[serde(default)]
    pub resume: Option<ResumeDecision>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            messages: vec![],
            tool_calls: vec![],
            iteration_count: 0,
            progress: None,
            scratch: serde_json::Map::new(),
            resume: None,
        }
    }
}

impl WorkflowState {
    /// Starts a state from a single user message.
    pub fn from_user_message(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    /// Content of the chronologically last User message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::User(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Content of the chronologically last Assistant message, if any.
    pub fn last_assistant_reply(&self) -> Option<String> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Stores a serializable value under `key` in the scratch map.
    pub fn set_scratch<T: Serialize>(&mut self, key: &str, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.scratch.insert(key.to_string(), v);
        }
    }

    /// Reads and deserializes a scratch value, if present and well-typed.
    pub fn scratch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.scratch
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The tool call with the given id, if any.
    pub fn tool_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|c| c.call_id == call_id)
    }

    /// Mutable variant of [`Self::tool_call`].
    pub fn tool_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|c| c.call_id == call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Scratch values round-trip through set/get with their type.
    #[test]
    fn scratch_roundtrip() {
        let mut state = WorkflowState::default();
        state.set_scratch("plan_devices", &vec!["R1".to_string(), "R2".to_string()]);
        let back: Vec<String> = state.scratch("plan_devices").unwrap();
        assert_eq!(back, vec!["R1", "R2"]);
        assert!(state.scratch::<u32>("missing").is_none());
    }

    /// **Scenario**: last_user_message and last_assistant_reply pick the newest of each role.
    #[test]
    fn last_message_helpers() {
        let mut state = WorkflowState::from_user_message("check R1 BGP");
        assert_eq!(state.last_user_message(), Some("check R1 BGP"));
        state.messages.push(Message::assistant("looking"));
        state.messages.push(Message::user("and R2"));
        state.messages.push(Message::assistant("done"));
        assert_eq!(state.last_user_message(), Some("and R2"));
        assert_eq!(state.last_assistant_reply().as_deref(), Some("done"));
    }

    /// **Scenario**: A state serialized today carries the current schema version;
    /// a blob without the field deserializes with the default.
    #[test]
    fn schema_version_in_blob() {
        let state = WorkflowState::default();
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["schema_version"], STATE_SCHEMA_VERSION);
        let legacy = serde_json::json!({"messages": [], "tool_calls": []});
        let back: WorkflowState = serde_json::from_value(legacy).unwrap();
        assert_eq!(back.schema_version, STATE_SCHEMA_VERSION);
    }
}
