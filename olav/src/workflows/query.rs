//! QueryDiagnostic: read-only question answering.
//!
//! classify → macro (schema/memory lookup) or micro (single-device query) →
//! synthesize. No interrupts; viewers may run it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use stream_event::ThinkingStep;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::graph::{CompilationError, CompiledWorkflow, Next, Node, RunContext, WorkflowGraph, END, START};
use crate::message::Message;
use crate::state::WorkflowState;
use crate::tools::catalogue::{TOOL_MEMORY_RECALL, TOOL_SCHEMA_SEARCH, TOOL_SMART_QUERY};
use crate::workflows::context::detect_device;
use crate::workflows::{scratch_keys, WorkflowContext};

/// Builds the compiled QueryDiagnostic graph.
pub fn build_query_workflow(
    ctx: Arc<WorkflowContext>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
) -> Result<CompiledWorkflow<WorkflowState>, CompilationError> {
    let mut graph = WorkflowGraph::new();
    graph.add_node("classify", Arc::new(ClassifyNode { ctx: ctx.clone() }));
    graph.add_node("macro_query", Arc::new(MacroQueryNode { ctx: ctx.clone() }));
    graph.add_node("micro_query", Arc::new(MicroQueryNode { ctx: ctx.clone() }));
    graph.add_node("synthesize", Arc::new(SynthesizeNode { ctx }));
    graph.add_edge(START, "classify");
    graph.add_conditional_edges(
        "classify",
        Arc::new(|state: &WorkflowState| {
            if state.scratch.contains_key(scratch_keys::TARGET_DEVICE) {
                "micro_query".to_string()
            } else {
                "macro_query".to_string()
            }
        }),
        Some(HashMap::from([
            ("micro_query".to_string(), "micro_query".to_string()),
            ("macro_query".to_string(), "macro_query".to_string()),
        ])),
    );
    graph.add_edge("macro_query", "synthesize");
    graph.add_edge("micro_query", "synthesize");
    graph.add_edge("synthesize", END);
    match checkpointer {
        Some(cp) => graph.compile_with_checkpointer(cp),
        None => graph.compile(),
    }
}

struct ClassifyNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for ClassifyNode {
    fn id(&self) -> &str {
        "classify"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state
            .last_user_message()
            .unwrap_or_default()
            .to_string();
        rc.emitter
            .thinking(ThinkingStep::Hypothesis, format!("Interpreting request: {text}"))
            .await;
        if state.scratch::<String>(scratch_keys::TARGET_DEVICE).is_none() {
            if let Some(device) = detect_device(&self.ctx.inventory, &text).await {
                state.set_scratch(scratch_keys::TARGET_DEVICE, &device);
            }
        }
        Ok((state, Next::Continue))
    }
}

/// Macro path: no concrete device — resolve intent against the schema index and
/// prior traces instead of touching hardware.
struct MacroQueryNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for MacroQueryNode {
    fn id(&self) -> &str {
        "macro_query"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state.last_user_message().unwrap_or_default().to_string();
        self.ctx
            .run_tool(rc, &mut state, TOOL_SCHEMA_SEARCH, json!({"text": text}))
            .await?;
        self.ctx
            .run_tool(rc, &mut state, TOOL_MEMORY_RECALL, json!({"text": text}))
            .await?;
        Ok((state, Next::Continue))
    }
}

/// Micro path: one live read-only device query.
struct MicroQueryNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for MicroQueryNode {
    fn id(&self) -> &str {
        "micro_query"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state.last_user_message().unwrap_or_default().to_string();
        let device: String = state
            .scratch(scratch_keys::TARGET_DEVICE)
            .ok_or_else(|| OrchestratorError::Internal("micro query without target device".into()))?;
        let result = self
            .ctx
            .run_tool(
                rc,
                &mut state,
                TOOL_SMART_QUERY,
                json!({"text": text, "device": device}),
            )
            .await?;
        if let Some(output) = result.get("output").and_then(|v| v.as_str()) {
            state.messages.push(Message::tool(TOOL_SMART_QUERY, output));
        }
        Ok((state, Next::Continue))
    }
}

const SYNTHESIZE_INSTRUCTION: &str =
    "Answer the operator's question from the gathered evidence, concisely.";

struct SynthesizeNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for SynthesizeNode {
    fn id(&self) -> &str {
        "synthesize"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let mut prompt = vec![Message::system(SYNTHESIZE_INSTRUCTION)];
        prompt.extend(state.messages.iter().cloned());
        for call in &state.tool_calls {
            if let Some(result) = &call.result {
                prompt.push(Message::tool(call.tool_name.clone(), result.to_string()));
            }
        }
        let reply = self
            .ctx
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;
        for word in reply.split_inclusive(' ') {
            rc.emitter.token(word).await;
        }
        state.messages.push(Message::assistant(reply));
        Ok((state, Next::End))
    }
}
