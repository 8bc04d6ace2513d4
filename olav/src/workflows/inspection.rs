//! Inspection: enumerate scope → parallel per-device probe → compare against
//! criteria → render report.
//!
//! The same graph serves interactive runs and detached jobs; the job layer
//! injects the inspection profile through state and a live progress sink at
//! build time.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stream_event::ThinkingStep;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::fanout::{OpKind, Outcome, ProgressFn};
use crate::graph::{
    CompilationError, CompiledWorkflow, Next, Node, RunContext, WorkflowGraph, END, START,
};
use crate::inventory::{Device, DeviceScope};
use crate::message::Message;
use crate::state::{Progress, WorkflowState};
use crate::tools::catalogue::TOOL_REPORT_GENERATOR;
use crate::workflows::context::detect_device;
use crate::workflows::{scratch_keys, WorkflowContext};

/// A configured inspection: what to run where, and what counts as a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionProfile {
    pub id: String,
    pub name: String,
    pub scope: DeviceScope,
    /// Read-only command probed on every device in scope.
    pub command: String,
    /// Pass criterion: when set, a device passes only if its output contains this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_contains: Option<String>,
}

/// Builds the compiled Inspection graph. `progress` receives one update per
/// completed device (detached jobs poll it); pass `None` for interactive runs.
pub fn build_inspection_workflow(
    ctx: Arc<WorkflowContext>,
    progress: Option<ProgressFn>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
) -> Result<CompiledWorkflow<WorkflowState>, CompilationError> {
    let mut graph = WorkflowGraph::new();
    graph.add_node("enumerate", Arc::new(EnumerateNode { ctx: ctx.clone() }));
    graph.add_node("probe", Arc::new(ProbeNode { ctx: ctx.clone(), progress }));
    graph.add_node("compare", Arc::new(CompareNode));
    graph.add_node("render", Arc::new(RenderNode { ctx }));
    graph.add_edge(START, "enumerate");
    graph.add_edge("enumerate", "probe");
    graph.add_edge("probe", "compare");
    graph.add_edge("compare", "render");
    graph.add_edge("render", END);
    match checkpointer {
        Some(cp) => graph.compile_with_checkpointer(cp),
        None => graph.compile(),
    }
}

const DEVICES_KEY: &str = "inspection_devices";

struct EnumerateNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for EnumerateNode {
    fn id(&self) -> &str {
        "enumerate"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let profile = match state.scratch::<InspectionProfile>(scratch_keys::INSPECTION_PROFILE) {
            Some(p) => p,
            None => {
                // Interactive run without a configured profile: inspect the
                // device named in the request.
                let text = state.last_user_message().unwrap_or_default().to_string();
                let device = detect_device(&self.ctx.inventory, &text).await.ok_or_else(|| {
                    OrchestratorError::BadArguments(
                        "no inspection profile and no device named in the request".into(),
                    )
                })?;
                let profile = InspectionProfile {
                    id: "adhoc".into(),
                    name: format!("Ad hoc inspection of {device}"),
                    scope: DeviceScope::Names(vec![device]),
                    command: "show version".into(),
                    expect_contains: None,
                };
                state.set_scratch(scratch_keys::INSPECTION_PROFILE, &profile);
                profile
            }
        };

        let devices = self
            .ctx
            .inventory
            .resolve(&profile.scope)
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;
        if devices.is_empty() {
            return Err(OrchestratorError::EmptyScope(format!(
                "inspection scope '{}' resolved to zero devices",
                profile.scope
            )));
        }
        rc.emitter
            .thinking(
                ThinkingStep::Hypothesis,
                format!("Probing {} devices for {}", devices.len(), profile.name),
            )
            .await;
        state.progress = Some(Progress {
            completed: 0,
            total: devices.len(),
        });
        state.set_scratch(DEVICES_KEY, &devices);
        Ok((state, Next::Continue))
    }
}

struct ProbeNode {
    ctx: Arc<WorkflowContext>,
    progress: Option<ProgressFn>,
}

#[async_trait]
impl Node<WorkflowState> for ProbeNode {
    fn id(&self) -> &str {
        "probe"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let profile: InspectionProfile = state
            .scratch(scratch_keys::INSPECTION_PROFILE)
            .ok_or_else(|| OrchestratorError::Internal("probe without a profile".into()))?;
        let devices: Vec<Device> = state
            .scratch(DEVICES_KEY)
            .ok_or_else(|| OrchestratorError::Internal("probe without a device set".into()))?;

        let adapter = self.ctx.adapter.clone();
        let command = profile.command.clone();
        let cancel = rc.cancel.clone();
        let outcomes = self
            .ctx
            .fanout
            .run(
                &devices,
                OpKind::Read,
                &rc.cancel,
                self.progress.clone(),
                move |device| {
                    let adapter = adapter.clone();
                    let command = command.clone();
                    let cancel = cancel.clone();
                    async move {
                        adapter
                            .run_command(&device, &command, &cancel)
                            .await
                            .map(|out| out.output)
                    }
                },
            )
            .await?;

        let ordered: BTreeMap<String, Outcome> = outcomes.into_iter().collect();
        state.progress = Some(Progress {
            completed: ordered.len(),
            total: ordered.len(),
        });
        state.set_scratch(scratch_keys::OUTCOMES, &ordered);
        Ok((state, Next::Continue))
    }
}

/// Applies the pass criterion: a device that answered but does not meet the
/// expectation becomes a failure.
struct CompareNode;

#[async_trait]
impl Node<WorkflowState> for CompareNode {
    fn id(&self) -> &str {
        "compare"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        _rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let profile: InspectionProfile = state
            .scratch(scratch_keys::INSPECTION_PROFILE)
            .ok_or_else(|| OrchestratorError::Internal("compare without a profile".into()))?;
        let Some(expected) = profile.expect_contains else {
            return Ok((state, Next::Continue));
        };
        let mut outcomes: BTreeMap<String, Outcome> = state
            .scratch(scratch_keys::OUTCOMES)
            .ok_or_else(|| OrchestratorError::Internal("compare without outcomes".into()))?;
        for outcome in outcomes.values_mut() {
            if let Outcome::Ok { output } = outcome {
                if !output.contains(&expected) {
                    *outcome = Outcome::Error {
                        message: format!("criteria not met: expected '{expected}'"),
                    };
                }
            }
        }
        state.set_scratch(scratch_keys::OUTCOMES, &outcomes);
        Ok((state, Next::Continue))
    }
}

struct RenderNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for RenderNode {
    fn id(&self) -> &str {
        "render"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let profile: InspectionProfile = state
            .scratch(scratch_keys::INSPECTION_PROFILE)
            .ok_or_else(|| OrchestratorError::Internal("render without a profile".into()))?;
        let outcomes: BTreeMap<String, Outcome> = state
            .scratch(scratch_keys::OUTCOMES)
            .ok_or_else(|| OrchestratorError::Internal("render without outcomes".into()))?;

        let result = self
            .ctx
            .run_tool(
                rc,
                &mut state,
                TOOL_REPORT_GENERATOR,
                json!({
                    "inspection_id": profile.id,
                    "title": profile.name,
                    "results": outcomes,
                }),
            )
            .await?;
        let report_id = result
            .get("report_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| OrchestratorError::Internal("report generator returned no id".into()))?
            .to_string();
        let summary = result
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        state.set_scratch(scratch_keys::REPORT_ID, &report_id);
        rc.emitter.token(&summary).await;
        state.messages.push(Message::assistant(summary));
        Ok((state, Next::End))
    }
}
