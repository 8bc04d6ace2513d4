//! Workflow node trait: one step in a graph.
//!
//! Receives state `S` and the run context, returns the updated `S` plus `Next`
//! routing. A node that needs human approval returns
//! `OrchestratorError::Interrupted`; the engine checkpoints and halts.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::OrchestratorError;

use super::{Next, RunContext};

/// One step in a workflow: state in, (state out, next step).
///
/// The run context carries the thread id, the cancellation token, and the stream
/// emitter; long-running nodes should observe `ctx.cancel` and pass it to
/// outbound calls.
///
/// **Interaction**: Registered via `WorkflowGraph::add_node`; executed by
/// `CompiledWorkflow::invoke`.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"classify"`, `"approval_gate"`). Unique within a graph.
    fn id(&self) -> &str;

    /// One step: state in, (state out, next step).
    async fn run(&self, state: S, ctx: &RunContext) -> Result<(S, Next), OrchestratorError>;
}
