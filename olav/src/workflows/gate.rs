//! Approval gate and pending-call application, shared by the write workflows.
//!
//! The gate sits between planning and application. With no decision in state it
//! raises an interrupt built from the plan; a resumed decision is consumed
//! exactly once (approve → fall through, edit → re-validate then fall through,
//! reject → the branch terminates with `UserRejected` and no side effect).
//! Admin auto-approve skips the gate.

use std::sync::Arc;

use async_trait::async_trait;
use stream_event::ThinkingStep;

use crate::error::OrchestratorError;
use crate::graph::{
    DecisionKind, InterruptRequest, Next, Node, RunContext,
};
use crate::message::Message;
use crate::state::WorkflowState;
use crate::tools::ToolCallStatus;
use crate::workflows::{scratch_keys, PlanSummary, WorkflowContext};

/// Human-in-the-loop gate for one pending write call.
pub struct ApprovalGate {
    pub ctx: Arc<WorkflowContext>,
    /// Tool whose arguments an `edit` decision replaces.
    pub apply_tool: &'static str,
}

impl ApprovalGate {
    fn plan_and_call(
        state: &WorkflowState,
    ) -> Result<(PlanSummary, String), OrchestratorError> {
        let plan: PlanSummary = state
            .scratch(scratch_keys::PLAN)
            .ok_or_else(|| OrchestratorError::Internal("gate reached without a plan".into()))?;
        let call_id: String = state
            .scratch(scratch_keys::PENDING_CALL)
            .ok_or_else(|| OrchestratorError::Internal("gate reached without a pending call".into()))?;
        Ok((plan, call_id))
    }
}

#[async_trait]
impl Node<WorkflowState> for ApprovalGate {
    fn id(&self) -> &str {
        "approval_gate"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let (mut plan, call_id) = Self::plan_and_call(&state)?;

        if let Some(decision) = state.resume.take() {
            if decision.call_id != call_id {
                return Err(OrchestratorError::Conflict(format!(
                    "decision targets call {}, pending call is {}",
                    decision.call_id, call_id
                )));
            }
            match decision.decision {
                DecisionKind::Approve => {
                    tracing::info!(thread = %rc.thread_id, call = %call_id, "change approved");
                }
                DecisionKind::Edit => {
                    let edited = decision.edited_arguments.ok_or_else(|| {
                        OrchestratorError::BadArguments(
                            "edit decision without edited_arguments".into(),
                        )
                    })?;
                    let spec = self.ctx.registry.spec(self.apply_tool).ok_or_else(|| {
                        OrchestratorError::Internal(format!("unknown apply tool {}", self.apply_tool))
                    })?;
                    spec.validate_args(&edited).map_err(OrchestratorError::from)?;
                    if let Some(commands) = edited.get("commands").and_then(|v| v.as_array()) {
                        plan.commands = commands
                            .iter()
                            .filter_map(|c| c.as_str().map(str::to_string))
                            .collect();
                        state.set_scratch(scratch_keys::PLAN, &plan);
                    }
                    if let Some(call) = state.tool_call_mut(&call_id) {
                        call.arguments = edited;
                    }
                    tracing::info!(thread = %rc.thread_id, call = %call_id, "change approved with edits");
                }
                DecisionKind::Reject => {
                    self.ctx.mark_call(&mut state, &call_id, ToolCallStatus::Rejected);
                    let reason = decision
                        .rejection_reason
                        .unwrap_or_else(|| "operator rejected the change".into());
                    state
                        .messages
                        .push(Message::assistant(format!("Change not applied: {reason}")));
                    return Err(OrchestratorError::UserRejected(reason));
                }
            }
            return Ok((state, Next::Continue));
        }

        if state.scratch::<bool>(scratch_keys::AUTO_APPROVE).unwrap_or(false) {
            rc.emitter
                .thinking(ThinkingStep::Verification, "auto-approved by admin policy")
                .await;
            return Ok((state, Next::Continue));
        }

        Err(OrchestratorError::Interrupted(Box::new(InterruptRequest {
            thread_id: rc.thread_id.clone(),
            call_id,
            message: format!("Approve {} on {}", plan.operation, plan.device),
            risk_level: plan.risk_level,
            execution_plan: plan.to_execution_plan(),
            allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject],
        })))
    }
}

/// Runs the call held at the gate and folds its result into the conversation.
pub struct ApplyPendingNode {
    pub ctx: Arc<WorkflowContext>,
    pub node_id: &'static str,
}

#[async_trait]
impl Node<WorkflowState> for ApplyPendingNode {
    fn id(&self) -> &str {
        self.node_id
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let call_id: String = state
            .scratch(scratch_keys::PENDING_CALL)
            .ok_or_else(|| OrchestratorError::Internal("apply reached without a pending call".into()))?;
        let call = state
            .tool_call(&call_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::Internal(format!("pending call {call_id} not in state")))?;
        let tool_name = call.tool_name.clone();
        let result = self.ctx.invoke_call(rc, &mut state, call).await?;
        let summary = result
            .get("output")
            .and_then(|v| v.as_str())
            .unwrap_or("applied")
            .to_string();
        state.messages.push(Message::tool(tool_name, summary));
        Ok((state, Next::Continue))
    }
}

/// Shared workflow-test fixtures; used by every workflow module's tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::device::MockAdapter;
    use crate::fanout::{FanOut, FanOutConfig};
    use crate::inventory::{device, StaticInventory};
    use crate::knowledge::{KnowledgeSources, StaticRetriever};
    use crate::llm::MockLlm;
    use crate::report::{MemoryReportStore, ReportStore};
    use crate::tools::catalogue::{register_catalogue, CatalogueDeps};
    use crate::tools::ToolRegistry;
    use crate::workflows::context::{WorkflowContext, WorkflowLimits};

    /// A full in-memory workflow context plus handles tests script against.
    pub(crate) struct Fixture {
        pub ctx: Arc<WorkflowContext>,
        pub llm: Arc<MockLlm>,
        pub adapter: Arc<MockAdapter>,
        pub reports: Arc<MemoryReportStore>,
    }

    pub(crate) fn fixture() -> Fixture {
        let llm = Arc::new(MockLlm::new(""));
        let inventory = Arc::new(StaticInventory::new(vec![
            device("R1", "core", "router", "fra"),
            device("R2", "core", "router", "ams"),
            device("SW1", "access", "switch", "fra"),
        ]));
        let adapter = Arc::new(MockAdapter::new());
        let reports = Arc::new(MemoryReportStore::new());
        let knowledge = KnowledgeSources {
            episodic: Some(Arc::new(StaticRetriever::new(
                "episodic",
                vec![("checked bgp peers via bgp_neighbors".into(), "trace:41".into())],
            ))),
            schema: Some(Arc::new(StaticRetriever::new(
                "schema",
                vec![("bgp_neighbors: peer state table".into(), "table:bgp_neighbors".into())],
            ))),
            documents: None,
        };
        let fanout = FanOut::new(FanOutConfig {
            max_concurrency: 10,
            device_timeout: Duration::from_millis(200),
        });
        let report_store: Arc<dyn ReportStore> = reports.clone();
        let deps = CatalogueDeps {
            llm: llm.clone(),
            inventory: inventory.clone(),
            adapter: adapter.clone(),
            knowledge: knowledge.clone(),
            reports: report_store,
            fanout: fanout.clone(),
        };
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        register_catalogue(&mut registry, &deps).unwrap();
        Fixture {
            ctx: Arc::new(WorkflowContext {
                registry: Arc::new(registry),
                llm: llm.clone(),
                inventory,
                adapter: adapter.clone(),
                knowledge,
                fanout,
                limits: WorkflowLimits::default(),
            }),
            llm,
            adapter,
            reports,
        }
    }

    pub(crate) fn workflow_ctx_with_llm() -> (Arc<WorkflowContext>, Arc<MockLlm>) {
        let f = fixture();
        (f.ctx, f.llm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::graph::{ResumeDecision, RiskLevel};
    use crate::tools::catalogue::TOOL_APPLY_CONFIG;
    use crate::tools::ToolCall;
    use crate::workflows::gate::tests_support::workflow_ctx_with_llm;

    fn workflow_ctx() -> Arc<WorkflowContext> {
        workflow_ctx_with_llm().0
    }

    fn gated_state(call_id_out: &mut String) -> WorkflowState {
        let mut state = WorkflowState::from_user_message("shut Loopback100 on R1");
        let call = ToolCall::pending_approval(
            TOOL_APPLY_CONFIG,
            json!({"device": "R1", "commands": ["interface Loopback100", "shutdown"]}),
        );
        *call_id_out = call.call_id.clone();
        state.set_scratch(
            scratch_keys::PLAN,
            &PlanSummary {
                device: "R1".into(),
                devices: vec!["R1".into()],
                operation: "shut_interface".into(),
                commands: vec!["interface Loopback100".into(), "shutdown".into()],
                risk_level: RiskLevel::High,
            },
        );
        state.set_scratch(scratch_keys::PENDING_CALL, &call.call_id);
        state.tool_calls.push(call);
        state
    }

    /// **Scenario**: Without a decision the gate interrupts with the plan and the
    /// full decision set; nothing is applied.
    #[tokio::test]
    async fn gate_interrupts_without_decision() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx, apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let state = gated_state(&mut call_id);
        let rc = RunContext::detached("cli-1");
        match gate.run(state, &rc).await {
            Err(OrchestratorError::Interrupted(req)) => {
                assert_eq!(req.call_id, call_id);
                assert_eq!(req.risk_level, RiskLevel::High);
                assert_eq!(req.execution_plan.device, "R1");
                assert_eq!(req.execution_plan.operation, "shut_interface");
                assert_eq!(
                    req.allowed_decisions,
                    vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject]
                );
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
    }

    /// **Scenario**: Approve falls through and clears the consumed decision.
    #[tokio::test]
    async fn gate_approve_falls_through() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx, apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let mut state = gated_state(&mut call_id);
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: call_id.clone(),
            decision: DecisionKind::Approve,
            edited_arguments: None,
            rejection_reason: None,
        });
        let rc = RunContext::detached("cli-1");
        let (state, next) = gate.run(state, &rc).await.unwrap();
        assert_eq!(next, Next::Continue);
        assert!(state.resume.is_none(), "decision consumed");
    }

    /// **Scenario**: Edit validates the replacement arguments; invalid edits are
    /// BadArguments, valid ones update the pending call and plan.
    #[tokio::test]
    async fn gate_edit_validates_arguments() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx: ctx.clone(), apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let mut state = gated_state(&mut call_id);
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: call_id.clone(),
            decision: DecisionKind::Edit,
            edited_arguments: Some(json!({"device": "R1"})),
            rejection_reason: None,
        });
        let rc = RunContext::detached("cli-1");
        assert!(matches!(
            gate.run(state, &rc).await,
            Err(OrchestratorError::BadArguments(_))
        ));

        let mut state = gated_state(&mut call_id);
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: call_id.clone(),
            decision: DecisionKind::Edit,
            edited_arguments: Some(
                json!({"device": "R1", "commands": ["interface Loopback100", "no shutdown"]}),
            ),
            rejection_reason: None,
        });
        let (state, _) = gate.run(state, &rc).await.unwrap();
        let plan: PlanSummary = state.scratch(scratch_keys::PLAN).unwrap();
        assert_eq!(plan.commands[1], "no shutdown");
        assert_eq!(
            state.tool_call(&call_id).unwrap().arguments["commands"][1],
            "no shutdown"
        );
    }

    /// **Scenario**: Reject marks the call rejected and terminates with UserRejected.
    #[tokio::test]
    async fn gate_reject_terminates_branch() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx, apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let mut state = gated_state(&mut call_id);
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: call_id.clone(),
            decision: DecisionKind::Reject,
            edited_arguments: None,
            rejection_reason: Some("not during business hours".into()),
        });
        let rc = RunContext::detached("cli-1");
        match gate.run(state, &rc).await {
            Err(OrchestratorError::UserRejected(reason)) => {
                assert!(reason.contains("business hours"));
            }
            other => panic!("expected UserRejected, got {other:?}"),
        }
    }

    /// **Scenario**: A decision for a different call id is a Conflict.
    #[tokio::test]
    async fn gate_mismatched_call_is_conflict() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx, apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let mut state = gated_state(&mut call_id);
        state.resume = Some(ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: "someone-else".into(),
            decision: DecisionKind::Approve,
            edited_arguments: None,
            rejection_reason: None,
        });
        let rc = RunContext::detached("cli-1");
        assert!(matches!(
            gate.run(state, &rc).await,
            Err(OrchestratorError::Conflict(_))
        ));
    }

    /// **Scenario**: Auto-approve (admin) skips the interrupt entirely.
    #[tokio::test]
    async fn gate_auto_approve_skips_interrupt() {
        let ctx = workflow_ctx();
        let gate = ApprovalGate { ctx, apply_tool: TOOL_APPLY_CONFIG };
        let mut call_id = String::new();
        let mut state = gated_state(&mut call_id);
        state.set_scratch(scratch_keys::AUTO_APPROVE, &true);
        let rc = RunContext::detached("cli-1");
        let (_, next) = gate.run(state, &rc).await.unwrap();
        assert_eq!(next, Next::Continue);
    }
}
