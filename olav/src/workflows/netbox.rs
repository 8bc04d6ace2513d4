//! NetBoxManagement: diff intent vs. inventory → approval interrupt → apply.
//!
//! A no-op diff short-circuits to the terminal node without raising a gate —
//! there is nothing to approve when the record already matches.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_event::ThinkingStep;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::graph::{
    CompilationError, CompiledWorkflow, Next, Node, RiskLevel, RunContext, WorkflowGraph, END,
    START,
};
use crate::message::Message;
use crate::state::WorkflowState;
use crate::tools::catalogue::{TOOL_NETBOX_APPLY, TOOL_NETBOX_DIFF};
use crate::tools::ToolCall;
use crate::workflows::gate::{ApplyPendingNode, ApprovalGate};
use crate::workflows::{scratch_keys, PlanSummary, WorkflowContext};

/// Builds the compiled NetBoxManagement graph.
pub fn build_netbox_workflow(
    ctx: Arc<WorkflowContext>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
) -> Result<CompiledWorkflow<WorkflowState>, CompilationError> {
    let mut graph = WorkflowGraph::new();
    graph.add_node("diff", Arc::new(DiffNode { ctx: ctx.clone() }));
    graph.add_node(
        "approval_gate",
        Arc::new(ApprovalGate { ctx: ctx.clone(), apply_tool: TOOL_NETBOX_APPLY }),
    );
    graph.add_node(
        "apply",
        Arc::new(ApplyPendingNode { ctx, node_id: "apply" }),
    );
    graph.add_edge(START, "diff");
    graph.add_edge("diff", "approval_gate");
    graph.add_edge("approval_gate", "apply");
    graph.add_edge("apply", END);
    match checkpointer {
        Some(cp) => graph.compile_with_checkpointer(cp),
        None => graph.compile(),
    }
}

const EXTRACT_INSTRUCTION: &str = "Extract the intended inventory update. Reply with JSON \
    {\"device\": name, \"field\": field, \"value\": new_value}.";

struct DiffNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for DiffNode {
    fn id(&self) -> &str {
        "diff"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state.last_user_message().unwrap_or_default().to_string();
        rc.emitter
            .thinking(ThinkingStep::Hypothesis, "Comparing the request against the inventory record")
            .await;

        let reply = self
            .ctx
            .llm
            .complete(&[Message::system(EXTRACT_INSTRUCTION), Message::user(&text)])
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;
        let intent: Value = serde_json::from_str(&reply).map_err(|_| {
            OrchestratorError::BadArguments("could not extract an inventory update from the request".into())
        })?;
        let (device, field, value) = match (
            intent.get("device").and_then(Value::as_str),
            intent.get("field").and_then(Value::as_str),
            intent.get("value").and_then(Value::as_str),
        ) {
            (Some(d), Some(f), Some(v)) => (d.to_string(), f.to_string(), v.to_string()),
            _ => {
                return Err(OrchestratorError::BadArguments(
                    "inventory update needs device, field, and value".into(),
                ))
            }
        };

        let diff = self
            .ctx
            .run_tool(
                rc,
                &mut state,
                TOOL_NETBOX_DIFF,
                json!({"device": device, "field": field, "value": value}),
            )
            .await?;
        if diff.get("changed") != Some(&Value::Bool(true)) {
            let reply = format!("{device} already has {field} = {value}; nothing to change.");
            rc.emitter.token(&reply).await;
            state.messages.push(Message::assistant(reply));
            return Ok((state, Next::End));
        }

        let from = diff.get("from").and_then(Value::as_str).unwrap_or("");
        let plan = PlanSummary {
            device: device.clone(),
            devices: vec![device.clone()],
            operation: format!("netbox_set_{field}"),
            commands: vec![format!("{field}: {from} -> {value}")],
            risk_level: RiskLevel::Medium,
        };
        let pending = ToolCall::pending_approval(
            TOOL_NETBOX_APPLY,
            json!({"device": device, "field": field, "value": value}),
        );
        state.set_scratch(scratch_keys::PLAN, &plan);
        state.set_scratch(scratch_keys::PENDING_CALL, &pending.call_id);
        state.tool_calls.push(pending);
        Ok((state, Next::Continue))
    }
}
