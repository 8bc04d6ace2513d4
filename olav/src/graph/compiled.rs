//! Compiled workflow: immutable structure, supports invoke only.
//!
//! Built by `WorkflowGraph::compile` or `compile_with_checkpointer`. Runs from
//! the first node (or an explicit resumption node), checkpointing after every
//! node. Interrupts checkpoint the pre-node state keyed to the interrupted node
//! so a later resume re-runs exactly that node with the decision injected.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::error::OrchestratorError;
use crate::graph::conditional::NextEntry;
use crate::graph::node::Node;
use crate::graph::retry::RetryPolicy;
use crate::graph::run_context::RunContext;
use crate::graph::state_graph::END;
use crate::graph::Next;

/// Compiled workflow graph: immutable, clone-cheap (nodes are shared).
///
/// **Interaction**: Created by `WorkflowGraph::compile*`; invoked by the
/// dispatcher for live threads and by the job layer for detached runs.
#[derive(Clone)]
pub struct CompiledWorkflow<S> {
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(super) first_node_id: String,
    /// Routing after each node: unconditional target or a state router.
    pub(super) next_map: HashMap<String, NextEntry<S>>,
    pub(super) checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    pub(super) retry_policy: RetryPolicy,
    /// Runtime safety bound on node executions per invoke.
    pub(super) max_steps: u32,
}

impl<S> Debug for CompiledWorkflow<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("first_node_id", &self.first_node_id)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl<S> CompiledWorkflow<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Runs the graph from its start node.
    pub async fn invoke(&self, state: S, ctx: &RunContext) -> Result<S, OrchestratorError> {
        self.invoke_from(state, None, ctx).await
    }

    /// Runs the graph from `start_node` when given (checkpoint resumption),
    /// otherwise from the start node.
    ///
    /// After each node a checkpoint is written whose `current_node` is the next
    /// node to run (`END` on completion). Cancellation is observed at node
    /// boundaries; the state at the boundary is checkpointed before returning
    /// `Cancelled` so nothing is lost.
    pub async fn invoke_from(
        &self,
        state: S,
        start_node: Option<&str>,
        ctx: &RunContext,
    ) -> Result<S, OrchestratorError> {
        if self.nodes.is_empty() || !self.nodes.contains_key(&self.first_node_id) {
            return Err(OrchestratorError::Internal("empty graph".into()));
        }
        let mut current_id = match start_node {
            Some(id) if self.nodes.contains_key(id) => id.to_string(),
            Some(id) if id == END => {
                return Err(OrchestratorError::Conflict(
                    "thread already reached a terminal node".into(),
                ))
            }
            Some(id) => {
                return Err(OrchestratorError::Internal(format!(
                    "resumption node not in graph: {id}"
                )))
            }
            None => self.first_node_id.clone(),
        };
        let mut state = state;
        let mut steps: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                self.save_checkpoint(ctx, &current_id, &state, Vec::new()).await?;
                return Err(OrchestratorError::Cancelled);
            }
            steps += 1;
            if steps > self.max_steps {
                return Err(OrchestratorError::IterationLimitExceeded(format!(
                    "workflow exceeded {} node executions",
                    self.max_steps
                )));
            }

            let node = self
                .nodes
                .get(&current_id)
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!("jump to unknown node: {current_id}"))
                })?
                .clone();
            tracing::debug!(thread = %ctx.thread_id, node = %current_id, "node start");

            let (new_state, next) = match self.execute_with_retry(node, &state, ctx).await {
                Ok(output) => output,
                Err(OrchestratorError::Interrupted(req)) => {
                    // Checkpoint the pre-node state keyed to this node: resume
                    // re-runs the gate with the decision injected.
                    self.save_checkpoint(ctx, &current_id, &state, vec![req.call_id.clone()])
                        .await?;
                    tracing::info!(thread = %ctx.thread_id, node = %current_id, call = %req.call_id, "interrupted for approval");
                    return Err(OrchestratorError::Interrupted(req));
                }
                Err(e) => {
                    tracing::warn!(thread = %ctx.thread_id, node = %current_id, error = %e, "node failed");
                    return Err(e);
                }
            };
            state = new_state;

            let next_id: Option<String> = match self.next_map.get(&current_id) {
                Some(NextEntry::Conditional(router)) => {
                    let target = router.resolve_next(&state);
                    tracing::debug!(from = %current_id, to = %target, "conditional routing");
                    Some(target)
                }
                entry => match next {
                    Next::End => None,
                    Next::Node(id) => Some(id),
                    Next::Continue => match entry {
                        Some(NextEntry::Unconditional(id)) => Some(id.clone()),
                        _ => None,
                    },
                },
            };

            let should_end = next_id.as_deref().map_or(true, |id| id == END);
            let checkpoint_node = if should_end {
                END
            } else {
                next_id.as_deref().unwrap()
            };
            self.save_checkpoint(ctx, checkpoint_node, &state, Vec::new()).await?;

            if should_end {
                tracing::debug!(thread = %ctx.thread_id, steps, "workflow complete");
                return Ok(state);
            }
            current_id = next_id.unwrap();
        }
    }

    async fn execute_with_retry(
        &self,
        node: Arc<dyn Node<S>>,
        state: &S,
        ctx: &RunContext,
    ) -> Result<(S, Next), OrchestratorError> {
        let mut attempt = 0;
        loop {
            match node.run(state.clone(), ctx).await {
                Ok(output) => return Ok(output),
                Err(e @ OrchestratorError::Transient(_)) if self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay();
                    tracing::debug!(node = node.id(), attempt, error = %e, "retrying node");
                    if delay > std::time::Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn save_checkpoint(
        &self,
        ctx: &RunContext,
        current_node: &str,
        state: &S,
        pending_call_ids: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        let Some(cp) = &self.checkpointer else {
            return Ok(());
        };
        let checkpoint = Checkpoint::new(current_node, state.clone()).with_pending(pending_call_ids);
        cp.put(&ctx.thread_id, &checkpoint)
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::Internal(format!("checkpoint write: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::checkpoint::MemorySaver;
    use crate::graph::interrupt::{DecisionKind, ExecutionPlan, InterruptRequest, RiskLevel};
    use crate::graph::state_graph::{WorkflowGraph, START};

    #[derive(Clone)]
    struct AddNode {
        id: &'static str,
        delta: i32,
    }

    #[async_trait]
    impl Node<i32> for AddNode {
        fn id(&self) -> &str {
            self.id
        }
        async fn run(&self, state: i32, _ctx: &RunContext) -> Result<(i32, Next), OrchestratorError> {
            Ok((state + self.delta, Next::Continue))
        }
    }

    fn two_step_graph() -> CompiledWorkflow<i32> {
        let mut graph = WorkflowGraph::<i32>::new();
        graph.add_node("first", Arc::new(AddNode { id: "first", delta: 1 }));
        graph.add_node("second", Arc::new(AddNode { id: "second", delta: 2 }));
        graph.add_edge(START, "first");
        graph.add_edge("first", "second");
        graph.add_edge("second", END);
        graph.compile().expect("graph compiles")
    }

    /// **Scenario**: A linear two-node graph applies both nodes in order.
    #[tokio::test]
    async fn invoke_linear_chain() {
        let ctx = RunContext::detached("t1");
        let out = two_step_graph().invoke(0, &ctx).await.unwrap();
        assert_eq!(out, 3);
    }

    /// **Scenario**: Conditional edges route by state.
    #[tokio::test]
    async fn invoke_conditional_routes_by_state() {
        let mut graph = WorkflowGraph::<i32>::new();
        graph.add_node("decide", Arc::new(AddNode { id: "decide", delta: 0 }));
        graph.add_node("even", Arc::new(AddNode { id: "even", delta: 10 }));
        graph.add_node("odd", Arc::new(AddNode { id: "odd", delta: 100 }));
        graph.add_edge(START, "decide");
        graph.add_edge("even", END);
        graph.add_edge("odd", END);
        graph.add_conditional_edges(
            "decide",
            Arc::new(|s: &i32| if s % 2 == 0 { "even".into() } else { "odd".into() }),
            None,
        );
        let compiled = graph.compile().unwrap();
        let ctx = RunContext::detached("t1");
        assert_eq!(compiled.invoke(2, &ctx).await.unwrap(), 12);
        assert_eq!(compiled.invoke(1, &ctx).await.unwrap(), 101);
    }

    /// Node that loops back to itself via Next::Node until the bound trips.
    #[derive(Clone)]
    struct LoopNode;

    #[async_trait]
    impl Node<i32> for LoopNode {
        fn id(&self) -> &str {
            "looper"
        }
        async fn run(&self, state: i32, _ctx: &RunContext) -> Result<(i32, Next), OrchestratorError> {
            Ok((state + 1, Next::Node("looper".to_string())))
        }
    }

    /// **Scenario**: An unbounded loop fails with IterationLimitExceeded at max_steps.
    #[tokio::test]
    async fn loop_hits_iteration_limit() {
        let mut graph = WorkflowGraph::<i32>::new().with_max_steps(5);
        graph.add_node("looper", Arc::new(LoopNode));
        graph.add_edge(START, "looper");
        graph.add_edge("looper", END);
        let compiled = graph.compile().unwrap();
        let ctx = RunContext::detached("t1");
        match compiled.invoke(0, &ctx).await {
            Err(OrchestratorError::IterationLimitExceeded(_)) => {}
            other => panic!("expected IterationLimitExceeded, got {other:?}"),
        }
    }

    /// Gate that interrupts until the counter says it has been approved.
    struct GateNode {
        approvals: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Node<i32> for GateNode {
        fn id(&self) -> &str {
            "gate"
        }
        async fn run(&self, state: i32, ctx: &RunContext) -> Result<(i32, Next), OrchestratorError> {
            if self.approvals.load(Ordering::SeqCst) == 0 {
                return Err(OrchestratorError::Interrupted(Box::new(InterruptRequest {
                    thread_id: ctx.thread_id.clone(),
                    call_id: "c1".into(),
                    message: "approve".into(),
                    risk_level: RiskLevel::High,
                    execution_plan: ExecutionPlan::default(),
                    allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Reject],
                })));
            }
            Ok((state + 100, Next::Continue))
        }
    }

    /// **Scenario**: An interrupt checkpoints the pre-gate state keyed to the gate
    /// node; invoke_from re-runs the gate and completes after approval.
    #[tokio::test]
    async fn interrupt_checkpoints_and_resumes() {
        let saver = Arc::new(MemorySaver::<i32>::new());
        let approvals = Arc::new(AtomicUsize::new(0));
        let mut graph = WorkflowGraph::<i32>::new();
        graph.add_node("prep", Arc::new(AddNode { id: "prep", delta: 1 }));
        graph.add_node("gate", Arc::new(GateNode { approvals: approvals.clone() }));
        graph.add_edge(START, "prep");
        graph.add_edge("prep", "gate");
        graph.add_edge("gate", END);
        let compiled = graph.compile_with_checkpointer(saver.clone()).unwrap();
        let ctx = RunContext::detached("t-resume");

        match compiled.invoke(0, &ctx).await {
            Err(OrchestratorError::Interrupted(req)) => assert_eq!(req.call_id, "c1"),
            other => panic!("expected Interrupted, got {other:?}"),
        }

        let cp = saver.latest("t-resume").await.unwrap().unwrap();
        assert_eq!(cp.current_node, "gate");
        assert_eq!(cp.state, 1, "state after prep, before gate");
        assert_eq!(cp.pending_call_ids, vec!["c1"]);

        approvals.store(1, Ordering::SeqCst);
        let out = compiled
            .invoke_from(cp.state, Some(&cp.current_node), &ctx)
            .await
            .unwrap();
        assert_eq!(out, 101);
        let final_cp = saver.latest("t-resume").await.unwrap().unwrap();
        assert_eq!(final_cp.current_node, END);
    }

    /// **Scenario**: A cancelled context stops at the next node boundary with a
    /// checkpoint written, and returns Cancelled.
    #[tokio::test]
    async fn cancellation_observed_at_boundary() {
        let saver = Arc::new(MemorySaver::<i32>::new());
        let graph = {
            let mut g = WorkflowGraph::<i32>::new();
            g.add_node("first", Arc::new(AddNode { id: "first", delta: 1 }));
            g.add_edge(START, "first");
            g.add_edge("first", END);
            g
        };
        let compiled = graph.compile_with_checkpointer(saver.clone()).unwrap();
        let ctx = RunContext::detached("t-cancel");
        ctx.cancel.cancel();
        match compiled.invoke(7, &ctx).await {
            Err(OrchestratorError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        let cp = saver.latest("t-cancel").await.unwrap().unwrap();
        assert_eq!(cp.state, 7, "pre-node state checkpointed on cancel");
    }

    /// Node that fails transiently a fixed number of times.
    struct FlakyNode {
        failures: Arc<AtomicUsize>,
        fail_times: usize,
    }

    #[async_trait]
    impl Node<i32> for FlakyNode {
        fn id(&self) -> &str {
            "flaky"
        }
        async fn run(&self, state: i32, _ctx: &RunContext) -> Result<(i32, Next), OrchestratorError> {
            let n = self.failures.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(OrchestratorError::Transient("connection reset".into()))
            } else {
                Ok((state + 10, Next::Continue))
            }
        }
    }

    /// **Scenario**: With a fixed retry policy, transient node failures are retried
    /// and the run succeeds; without one, the first failure surfaces.
    #[tokio::test]
    async fn retry_policy_covers_transient_failures() {
        let failures = Arc::new(AtomicUsize::new(0));
        let mut graph = WorkflowGraph::<i32>::new()
            .with_retry_policy(RetryPolicy::fixed(3, std::time::Duration::from_millis(1)));
        graph.add_node(
            "flaky",
            Arc::new(FlakyNode { failures: failures.clone(), fail_times: 2 }),
        );
        graph.add_edge(START, "flaky");
        graph.add_edge("flaky", END);
        let compiled = graph.compile().unwrap();
        let ctx = RunContext::detached("t1");
        assert_eq!(compiled.invoke(0, &ctx).await.unwrap(), 10);
        assert_eq!(failures.load(Ordering::SeqCst), 3);

        let failures = Arc::new(AtomicUsize::new(0));
        let mut graph = WorkflowGraph::<i32>::new();
        graph.add_node(
            "flaky",
            Arc::new(FlakyNode { failures: failures.clone(), fail_times: 1 }),
        );
        graph.add_edge(START, "flaky");
        graph.add_edge("flaky", END);
        let compiled = graph.compile().unwrap();
        assert!(matches!(
            compiled.invoke(0, &ctx).await,
            Err(OrchestratorError::Transient(_))
        ));
    }

    /// **Scenario**: Resuming from END is a Conflict, not a re-execution.
    #[tokio::test]
    async fn resume_from_terminal_is_conflict() {
        let compiled = two_step_graph();
        let ctx = RunContext::detached("t1");
        match compiled.invoke_from(0, Some(END), &ctx).await {
            Err(OrchestratorError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
