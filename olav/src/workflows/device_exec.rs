//! DeviceExecution: plan → approval interrupt → apply → verify.
//!
//! Always write-effecting: the plan step drafts commands without touching the
//! device, the gate holds the batch until a human (or admin auto-approve)
//! decides, and only then does the apply step push anything.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use stream_event::ThinkingStep;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::graph::{
    CompilationError, CompiledWorkflow, Next, Node, RiskLevel, RunContext, WorkflowGraph, END,
    START,
};
use crate::message::Message;
use crate::state::WorkflowState;
use crate::tools::catalogue::{TOOL_APPLY_CONFIG, TOOL_PLAN_CONFIG, TOOL_VERIFY_CONFIG};
use crate::tools::ToolCall;
use crate::workflows::context::detect_device;
use crate::workflows::gate::{ApplyPendingNode, ApprovalGate};
use crate::workflows::{scratch_keys, PlanSummary, WorkflowContext};

/// Builds the compiled DeviceExecution graph.
pub fn build_device_workflow(
    ctx: Arc<WorkflowContext>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
) -> Result<CompiledWorkflow<WorkflowState>, CompilationError> {
    let mut graph = WorkflowGraph::new();
    graph.add_node("plan", Arc::new(PlanNode { ctx: ctx.clone() }));
    graph.add_node(
        "approval_gate",
        Arc::new(ApprovalGate { ctx: ctx.clone(), apply_tool: TOOL_APPLY_CONFIG }),
    );
    graph.add_node(
        "apply",
        Arc::new(ApplyPendingNode { ctx: ctx.clone(), node_id: "apply" }),
    );
    graph.add_node("verify", Arc::new(VerifyNode { ctx }));
    graph.add_edge(START, "plan");
    graph.add_edge("plan", "approval_gate");
    graph.add_edge("approval_gate", "apply");
    graph.add_edge("apply", "verify");
    graph.add_edge("verify", END);
    match checkpointer {
        Some(cp) => graph.compile_with_checkpointer(cp),
        None => graph.compile(),
    }
}

fn risk_from_str(s: &str) -> RiskLevel {
    match s {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

struct PlanNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for PlanNode {
    fn id(&self) -> &str {
        "plan"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state.last_user_message().unwrap_or_default().to_string();
        let device = match state.scratch::<String>(scratch_keys::TARGET_DEVICE) {
            Some(d) => d,
            None => detect_device(&self.ctx.inventory, &text).await.ok_or_else(|| {
                OrchestratorError::BadArguments(
                    "no target device identified in the request".into(),
                )
            })?,
        };
        rc.emitter
            .thinking(
                ThinkingStep::Hypothesis,
                format!("Planning a configuration change for {device}"),
            )
            .await;

        let plan_value = self
            .ctx
            .run_tool(
                rc,
                &mut state,
                TOOL_PLAN_CONFIG,
                json!({"text": text, "device": device}),
            )
            .await?;

        let commands: Vec<String> = plan_value
            .get("commands")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let plan = PlanSummary {
            device: device.clone(),
            devices: vec![device.clone()],
            operation: plan_value
                .get("operation")
                .and_then(|v| v.as_str())
                .unwrap_or("config_change")
                .to_string(),
            commands: commands.clone(),
            risk_level: risk_from_str(
                plan_value.get("risk_level").and_then(|v| v.as_str()).unwrap_or("high"),
            ),
        };

        let pending = ToolCall::pending_approval(
            TOOL_APPLY_CONFIG,
            json!({"device": device, "commands": commands}),
        );
        state.set_scratch(scratch_keys::PLAN, &plan);
        state.set_scratch(scratch_keys::PENDING_CALL, &pending.call_id);
        state.tool_calls.push(pending);
        Ok((state, Next::Continue))
    }
}

struct VerifyNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for VerifyNode {
    fn id(&self) -> &str {
        "verify"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let plan: PlanSummary = state
            .scratch(scratch_keys::PLAN)
            .ok_or_else(|| OrchestratorError::Internal("verify reached without a plan".into()))?;
        self.ctx
            .run_tool(
                rc,
                &mut state,
                TOOL_VERIFY_CONFIG,
                json!({"device": plan.device}),
            )
            .await?;
        let reply = format!("Applied {} on {} and verified the result.", plan.operation, plan.device);
        for word in reply.split_inclusive(' ') {
            rc.emitter.token(word).await;
        }
        state.messages.push(Message::assistant(reply));
        Ok((state, Next::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_event::WireEvent;

    use crate::checkpoint::MemorySaver;
    use crate::graph::{DecisionKind, ResumeDecision};
    use crate::stream::StreamEmitter;
    use crate::workflows::gate::tests_support::fixture;

    const PLAN_REPLY: &str = r#"{"operation": "shut_interface", "commands": ["interface Loopback100", "shutdown"], "risk_level": "high"}"#;

    /// **Scenario**: The write path interrupts after planning with nothing applied;
    /// the stream shows thinking, plan tool pair, then the interrupt.
    #[tokio::test]
    async fn plan_then_interrupt_before_any_side_effect() {
        let f = fixture();
        f.llm.push_reply(PLAN_REPLY);
        let saver = Arc::new(MemorySaver::new());
        let workflow = build_device_workflow(f.ctx.clone(), Some(saver.clone())).unwrap();

        let (emitter, mut rx) = StreamEmitter::channel(64);
        let rc = RunContext::new("cli-1", emitter);
        let state = WorkflowState::from_user_message("shut Loopback100 on R1");
        let result = workflow.invoke(state, &rc).await;

        let req = match result {
            Err(OrchestratorError::Interrupted(req)) => req,
            other => panic!("expected interrupt, got {other:?}"),
        };
        assert_eq!(req.risk_level, RiskLevel::High);
        assert_eq!(req.execution_plan.device, "R1");
        assert_eq!(req.execution_plan.operation, "shut_interface");
        assert!(f.adapter.applied().is_empty(), "no device command before approval");

        let mut kinds = vec![];
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.to_value().unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["thinking", "tool_start", "tool_end"]);

        // The checkpoint parks the thread at the gate with the pending call.
        let cp = saver.latest("cli-1").await.unwrap().unwrap();
        assert_eq!(cp.current_node, "approval_gate");
        assert_eq!(cp.pending_call_ids, vec![req.call_id.clone()]);
    }

    /// **Scenario**: Resuming with approve applies and verifies; the new stream
    /// carries the apply tool pair and the device received the commands.
    #[tokio::test]
    async fn approve_resumes_through_apply_and_verify() {
        let f = fixture();
        f.llm.push_reply(PLAN_REPLY);
        let saver = Arc::new(MemorySaver::new());
        let workflow = build_device_workflow(f.ctx.clone(), Some(saver.clone())).unwrap();
        let rc = RunContext::detached("cli-1");
        let req = match workflow
            .invoke(WorkflowState::from_user_message("shut Loopback100 on R1"), &rc)
            .await
        {
            Err(OrchestratorError::Interrupted(req)) => req,
            other => panic!("expected interrupt, got {other:?}"),
        };

        let cp = saver.latest("cli-1").await.unwrap().unwrap();
        let mut state = cp.state;
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: req.call_id.clone(),
            decision: DecisionKind::Approve,
            edited_arguments: None,
            rejection_reason: None,
        });

        let (emitter, mut rx) = StreamEmitter::channel(64);
        let rc = RunContext::new("cli-1", emitter);
        let out = workflow
            .invoke_from(state, Some(&cp.current_node), &rc)
            .await
            .unwrap();

        assert_eq!(f.adapter.applied().len(), 1);
        assert_eq!(f.adapter.applied()[0].0, "R1");
        assert!(out.last_assistant_reply().unwrap().contains("shut_interface"));

        let mut tool_starts = vec![];
        while let Ok(ev) = rx.try_recv() {
            if let WireEvent::ToolStart { name, .. } = ev {
                tool_starts.push(name);
            }
        }
        assert_eq!(tool_starts, vec![TOOL_APPLY_CONFIG, TOOL_VERIFY_CONFIG]);
    }

    /// **Scenario**: Reject resumes to UserRejected and the device is untouched.
    #[tokio::test]
    async fn reject_leaves_device_untouched() {
        let f = fixture();
        f.llm.push_reply(PLAN_REPLY);
        let saver = Arc::new(MemorySaver::new());
        let workflow = build_device_workflow(f.ctx.clone(), Some(saver.clone())).unwrap();
        let rc = RunContext::detached("cli-1");
        let req = match workflow
            .invoke(WorkflowState::from_user_message("shut Loopback100 on R1"), &rc)
            .await
        {
            Err(OrchestratorError::Interrupted(req)) => req,
            other => panic!("expected interrupt, got {other:?}"),
        };

        let cp = saver.latest("cli-1").await.unwrap().unwrap();
        let mut state = cp.state;
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: req.call_id,
            decision: DecisionKind::Reject,
            edited_arguments: None,
            rejection_reason: None,
        });
        match workflow.invoke_from(state, Some(&cp.current_node), &rc).await {
            Err(OrchestratorError::UserRejected(_)) => {}
            other => panic!("expected UserRejected, got {other:?}"),
        }
        assert!(f.adapter.applied().is_empty());
    }

    /// **Scenario**: Admin auto-approve runs end-to-end without an interrupt.
    #[tokio::test]
    async fn auto_approve_runs_straight_through() {
        let f = fixture();
        f.llm.push_reply(PLAN_REPLY);
        let workflow = build_device_workflow(f.ctx.clone(), None).unwrap();
        let rc = RunContext::detached("cli-1");
        let mut state = WorkflowState::from_user_message("shut Loopback100 on R1");
        state.set_scratch(scratch_keys::AUTO_APPROVE, &true);
        workflow.invoke(state, &rc).await.unwrap();
        assert_eq!(f.adapter.applied().len(), 1);
    }
}
