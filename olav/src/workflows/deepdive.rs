//! DeepDive: expert multi-step analysis.
//!
//! decompose → loop{ take a batch of sub-tasks, dispatch each as a
//! QueryDiagnostic sub-workflow, record findings } → synthesize. The loop is
//! bounded by the configured depth; the batch width by the configured fan-out.
//! Exceeding the depth with work remaining fails with `IterationLimitExceeded`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use stream_event::ThinkingStep;

use crate::checkpoint::Checkpointer;
use crate::error::OrchestratorError;
use crate::graph::{
    CompilationError, CompiledWorkflow, Next, Node, RunContext, WorkflowGraph, END, START,
};
use crate::message::Message;
use crate::state::WorkflowState;
use crate::stream::StreamEmitter;
use crate::workflows::query::build_query_workflow;
use crate::workflows::{scratch_keys, WorkflowContext};

/// Builds the compiled DeepDive graph.
pub fn build_deepdive_workflow(
    ctx: Arc<WorkflowContext>,
    checkpointer: Option<Arc<dyn Checkpointer<WorkflowState>>>,
) -> Result<CompiledWorkflow<WorkflowState>, CompilationError> {
    let sub_workflow = build_query_workflow(ctx.clone(), None)?;
    let mut graph = WorkflowGraph::new();
    graph.add_node("decompose", Arc::new(DecomposeNode { ctx: ctx.clone() }));
    graph.add_node(
        "execute",
        Arc::new(ExecuteNode { ctx: ctx.clone(), sub_workflow }),
    );
    graph.add_node("synthesize", Arc::new(SynthesizeNode { ctx }));
    graph.add_edge(START, "decompose");
    graph.add_edge("decompose", "execute");
    graph.add_edge("execute", "synthesize");
    graph.add_edge("synthesize", END);
    match checkpointer {
        Some(cp) => graph.compile_with_checkpointer(cp),
        None => graph.compile(),
    }
}

const DECOMPOSE_INSTRUCTION: &str = "Break the analysis into independent sub-questions. \
    Reply with JSON {\"tasks\": [questions]}.";

struct DecomposeNode {
    ctx: Arc<WorkflowContext>,
}

#[async_trait]
impl Node<WorkflowState> for DecomposeNode {
    fn id(&self) -> &str {
        "decompose"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let text = state.last_user_message().unwrap_or_default().to_string();
        rc.emitter
            .thinking(ThinkingStep::Hypothesis, "Decomposing the task into sub-questions")
            .await;
        let reply = self
            .ctx
            .llm
            .complete(&[Message::system(DECOMPOSE_INSTRUCTION), Message::user(&text)])
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;
        let tasks: Vec<String> = serde_json::from_str::<Value>(&reply)
            .ok()
            .and_then(|v| {
                v.get("tasks").and_then(Value::as_array).map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
            })
            .filter(|t: &Vec<String>| !t.is_empty())
            .unwrap_or_else(|| vec![text]);
        rc.emitter
            .thinking(
                ThinkingStep::Reasoning,
                format!("{} sub-questions queued", tasks.len()),
            )
            .await;
        state.set_scratch(scratch_keys::TASKS, &tasks);
        state.set_scratch(scratch_keys::FINDINGS, &Vec::<Value>::new());
        Ok((state, Next::Continue))
    }
}

struct ExecuteNode {
    ctx: Arc<WorkflowContext>,
    sub_workflow: CompiledWorkflow<WorkflowState>,
}

#[async_trait]
impl Node<WorkflowState> for ExecuteNode {
    fn id(&self) -> &str {
        "execute"
    }

    async fn run(
        &self,
        mut state: WorkflowState,
        rc: &RunContext,
    ) -> Result<(WorkflowState, Next), OrchestratorError> {
        let mut tasks: Vec<String> = state.scratch(scratch_keys::TASKS).unwrap_or_default();
        if tasks.is_empty() {
            return Ok((state, Next::Continue));
        }
        if state.iteration_count >= self.ctx.limits.deepdive_max_depth {
            return Err(OrchestratorError::IterationLimitExceeded(format!(
                "deep-dive depth {} exhausted with {} sub-questions remaining",
                self.ctx.limits.deepdive_max_depth,
                tasks.len()
            )));
        }
        state.iteration_count += 1;

        let width = self.ctx.limits.deepdive_max_fanout.max(1);
        let batch: Vec<String> = tasks.drain(..tasks.len().min(width)).collect();
        rc.emitter
            .thinking(
                ThinkingStep::Reasoning,
                format!(
                    "Round {}: running {} sub-queries",
                    state.iteration_count,
                    batch.len()
                ),
            )
            .await;

        let runs = batch.into_iter().enumerate().map(|(i, task)| {
            let workflow = self.sub_workflow.clone();
            let sub_rc = RunContext::new(
                format!("{}-sub-{}-{}", rc.thread_id, state.iteration_count, i),
                StreamEmitter::sink(),
            )
            .with_cancel(rc.cancel.clone());
            async move {
                let sub_state = WorkflowState::from_user_message(&task);
                match workflow.invoke(sub_state, &sub_rc).await {
                    Ok(out) => json!({
                        "task": task,
                        "answer": out.last_assistant_reply().unwrap_or_default(),
                    }),
                    Err(e) => json!({"task": task, "error": e.to_string()}),
                }
            }
        });
        let round: Vec<Value> = futures::future::join_all(runs).await;

        let mut findings: Vec<Value> =
            state.scratch(scratch_keys::FINDINGS).unwrap_or_default();
        findings.extend(round);
        state.set_scratch(scratch_keys::FINDINGS, &findings);
        state.set_scratch(scratch_keys::TASKS, &tasks);

        if tasks.is_empty() {
            Ok((state, Next::Continue))
        } else {
            Ok((state, Next::Node("execute".to_string())))
        }
    }
}

const SYNTHESIZE_INSTRUCTION: &str =
    "Combine the sub-query findings into one coherent analysis for the operator.";

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
        let findings: Vec<Value> = state.scratch(scratch_keys::FINDINGS).unwrap_or_default();
        let mut prompt = vec![Message::system(SYNTHESIZE_INSTRUCTION)];
        prompt.extend(state.messages.iter().cloned());
        for finding in &findings {
            prompt.push(Message::tool("sub_query", finding.to_string()));
        }
        let reply = self
            .ctx
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;
        rc.emitter
            .thinking(ThinkingStep::Conclusion, format!("{} findings synthesized", findings.len()))
            .await;
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

    use crate::workflows::context::{WorkflowContext, WorkflowLimits};
    use crate::workflows::gate::tests_support::fixture;

    fn with_limits(ctx: &Arc<WorkflowContext>, limits: WorkflowLimits) -> Arc<WorkflowContext> {
        Arc::new(WorkflowContext {
            limits,
            ..(**ctx).clone()
        })
    }

    /// **Scenario**: Two sub-questions run as sub-workflows and both findings feed
    /// the synthesis; iteration_count records one round.
    #[tokio::test]
    async fn decompose_execute_synthesize() {
        let f = fixture();
        f.llm.push_reply(
            r#"{"tasks": ["where is bgp peer state stored", "where is interface status stored"]}"#,
        );
        let workflow = build_deepdive_workflow(f.ctx.clone(), None).unwrap();
        let rc = RunContext::detached("cli-1");
        let state = WorkflowState::from_user_message("why do core routers flap");
        let out = workflow.invoke(state, &rc).await.unwrap();

        let findings: Vec<Value> = out.scratch(scratch_keys::FINDINGS).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(out.iteration_count, 1);
        assert!(out.last_assistant_reply().is_some());
    }

    /// **Scenario**: More work than depth × fan-out allows fails with
    /// IterationLimitExceeded, not an endless loop.
    #[tokio::test]
    async fn depth_bound_enforced() {
        let f = fixture();
        let ctx = with_limits(
            &f.ctx,
            WorkflowLimits {
                deepdive_max_depth: 1,
                deepdive_max_fanout: 2,
            },
        );
        f.llm.push_reply(
            r#"{"tasks": ["q1", "q2", "q3", "q4", "q5"]}"#,
        );
        let workflow = build_deepdive_workflow(ctx, None).unwrap();
        let rc = RunContext::detached("cli-1");
        let state = WorkflowState::from_user_message("audit everything");
        match workflow.invoke(state, &rc).await {
            Err(OrchestratorError::IterationLimitExceeded(msg)) => {
                assert!(msg.contains("sub-questions remaining"), "{msg}");
            }
            other => panic!("expected IterationLimitExceeded, got {other:?}"),
        }
    }

    /// **Scenario**: An unparseable decomposition degrades to a single task.
    #[tokio::test]
    async fn unparseable_decomposition_degrades() {
        let f = fixture();
        f.llm.push_reply("just look at the routers");
        let workflow = build_deepdive_workflow(f.ctx.clone(), None).unwrap();
        let rc = RunContext::detached("cli-1");
        let out = workflow
            .invoke(WorkflowState::from_user_message("check fabric health"), &rc)
            .await
            .unwrap();
        let findings: Vec<Value> = out.scratch(scratch_keys::FINDINGS).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["task"], "check fabric health");
    }
}
