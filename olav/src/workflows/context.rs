//! Collaborator bundle shared by workflow nodes, plus the tool invocation
//! helper that keeps stream events and state bookkeeping in one place.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use stream_event::WireEvent;

use crate::device::DeviceAdapter;
use crate::error::OrchestratorError;
use crate::fanout::FanOut;
use crate::graph::RunContext;
use crate::inventory::Inventory;
use crate::knowledge::KnowledgeSources;
use crate::llm::LlmClient;
use crate::state::WorkflowState;
use crate::tools::{ToolCall, ToolCallStatus, ToolContext, ToolRegistry};

/// Loop bounds for the deep-dive workflow.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowLimits {
    pub deepdive_max_depth: u32,
    pub deepdive_max_fanout: usize,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            deepdive_max_depth: 3,
            deepdive_max_fanout: 30,
        }
    }
}

/// Everything workflow nodes need, passed as one `Arc`.
#[derive(Clone)]
pub struct WorkflowContext {
    pub registry: Arc<ToolRegistry>,
    pub llm: Arc<dyn LlmClient>,
    pub inventory: Arc<dyn Inventory>,
    pub adapter: Arc<dyn DeviceAdapter>,
    pub knowledge: KnowledgeSources,
    pub fanout: FanOut,
    pub limits: WorkflowLimits,
}

impl WorkflowContext {
    /// Invokes a registry tool with stream events and state bookkeeping:
    /// `tool_start` before, `tool_end` after, and the finished call appended to
    /// `state.tool_calls`.
    pub async fn run_tool(
        &self,
        rc: &RunContext,
        state: &mut WorkflowState,
        name: &str,
        args: Value,
    ) -> Result<Value, OrchestratorError> {
        let call = ToolCall::new(name, args);
        self.invoke_call(rc, state, call).await
    }

    /// Invokes an already-constructed call (e.g. one held at the approval gate).
    pub async fn invoke_call(
        &self,
        rc: &RunContext,
        state: &mut WorkflowState,
        mut call: ToolCall,
    ) -> Result<Value, OrchestratorError> {
        let display_name = self
            .registry
            .spec(&call.tool_name)
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| call.tool_name.clone());
        rc.emitter
            .emit(WireEvent::ToolStart {
                call_id: call.call_id.clone(),
                name: call.tool_name.clone(),
                display_name,
                arguments: call.arguments.clone(),
            })
            .await;

        let started = Instant::now();
        let tool_ctx = ToolContext::for_thread(rc.thread_id.clone(), rc.cancel.clone());
        let result = self.registry.invoke(&mut call, &tool_ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, summary) = match &result {
            Ok(value) => (true, summarize(value)),
            Err(e) => (false, e.to_string()),
        };
        rc.emitter
            .emit(WireEvent::ToolEnd {
                call_id: call.call_id.clone(),
                success,
                duration_ms,
                summary,
            })
            .await;

        // Replace the pending record if this call was already tracked.
        if let Some(existing) = state.tool_call_mut(&call.call_id) {
            *existing = call;
        } else {
            state.tool_calls.push(call);
        }
        result.map_err(OrchestratorError::from)
    }

    /// Marks a tracked call terminal without running it (gate rejections).
    pub fn mark_call(
        &self,
        state: &mut WorkflowState,
        call_id: &str,
        status: ToolCallStatus,
    ) {
        if let Some(call) = state.tool_call_mut(call_id) {
            call.status = status;
            call.ended_at = Some(chrono::Utc::now());
        }
    }
}

/// One-line summary of a tool result for `tool_end` events.
fn summarize(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut line = text.replace('\n', " ");
    if line.len() > 120 {
        line.truncate(117);
        line.push_str("...");
    }
    line
}

/// Scans the request for a device name known to the inventory. First match wins;
/// punctuation is trimmed so "R1," still resolves.
pub async fn detect_device(inventory: &Arc<dyn Inventory>, text: &str) -> Option<String> {
    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_');
        if word.is_empty() {
            continue;
        }
        if inventory.get(word).await.is_ok() {
            return Some(word.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{device, StaticInventory};

    /// **Scenario**: Device detection matches inventory names and ignores noise words.
    #[tokio::test]
    async fn detect_device_matches_inventory() {
        let inventory: Arc<dyn Inventory> = Arc::new(StaticInventory::new(vec![device(
            "R1", "core", "router", "fra",
        )]));
        assert_eq!(
            detect_device(&inventory, "check R1, BGP status").await,
            Some("R1".to_string())
        );
        assert_eq!(detect_device(&inventory, "check all core routers").await, None);
    }

    /// **Scenario**: Summaries are single-line and capped.
    #[test]
    fn summaries_capped() {
        let long = Value::String("x".repeat(500));
        let s = summarize(&long);
        assert!(s.len() <= 120);
        assert!(s.ends_with("..."));
        let multi = Value::String("a\nb".into());
        assert_eq!(summarize(&multi), "a b");
    }
}
