//! Workflow graph builder: nodes + explicit edges and optional conditional edges.
//!
//! Add nodes with `add_node`, define edges with `add_edge(from, to)` using
//! `START` and `END` for entry/exit, and `add_conditional_edges` for state-based
//! routing. Then `compile()` or `compile_with_checkpointer()` to obtain an
//! executable [`CompiledWorkflow`].
//!
//! Cycles are allowed — looping workflows jump back via `Next::Node` or a
//! conditional router — but every compiled graph carries a step bound enforced
//! at runtime, so a loop without its own exit condition fails with
//! `IterationLimitExceeded` instead of spinning.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::checkpoint::Checkpointer;
use crate::graph::compile_error::CompilationError;
use crate::graph::compiled::CompiledWorkflow;
use crate::graph::conditional::{ConditionalRouter, NextEntry, RouterFn};
use crate::graph::node::Node;
use crate::graph::retry::RetryPolicy;

/// Sentinel for graph entry: use as `from_id` in `add_edge(START, first_node)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: use as `to_id` in `add_edge(last_node, END)`.
pub const END: &str = "__end__";

/// Default runtime step bound for a compiled workflow.
pub const DEFAULT_MAX_STEPS: u32 = 64;

/// Workflow graph under construction. Generic over state type `S`.
///
/// **Interaction**: Accepts `Arc<dyn Node<S>>`; produces [`CompiledWorkflow<S>`].
pub struct WorkflowGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// Edges (from_id, to_id). A node has one outgoing edge or conditional edges.
    edges: Vec<(String, String)>,
    conditional_edges: HashMap<String, ConditionalRouter<S>>,
    retry_policy: RetryPolicy,
    max_steps: u32,
}

impl<S> Default for WorkflowGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WorkflowGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: HashMap::new(),
            retry_policy: RetryPolicy::None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Attaches a retry policy for node execution. Only `Transient` node errors
    /// are retried; everything else fails immediately.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Overrides the runtime step bound (default [`DEFAULT_MAX_STEPS`]).
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Adds a node; id must be unique. Replaces on same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an edge from `from_id` to `to_id`. Use `START`/`END` for entry/exit.
    /// A node may have either one outgoing edge or conditional edges, not both.
    pub fn add_edge(&mut self, from_id: impl Into<String>, to_id: impl Into<String>) -> &mut Self {
        self.edges.push((from_id.into(), to_id.into()));
        self
    }

    /// Adds conditional edges from `source`: after the node runs, `path(state)`
    /// returns a key, resolved through `path_map` when provided.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        path: RouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional_edges
            .insert(source.into(), ConditionalRouter::new(path, path_map));
        self
    }

    /// Builds the executable graph without persistence.
    pub fn compile(self) -> Result<CompiledWorkflow<S>, CompilationError> {
        self.compile_internal(None)
    }

    /// Builds the executable graph with a checkpointer: state is persisted after
    /// every node for the invoking thread.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Result<CompiledWorkflow<S>, CompilationError> {
        self.compile_internal(Some(checkpointer))
    }

    fn compile_internal(
        self,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Result<CompiledWorkflow<S>, CompilationError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(CompilationError::NodeNotFound(from.clone()));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(CompilationError::NodeNotFound(to.clone()));
            }
        }
        for (source, router) in &self.conditional_edges {
            if !self.nodes.contains_key(source) {
                return Err(CompilationError::NodeNotFound(source.clone()));
            }
            if let Some(ref path_map) = router.path_map {
                for target in path_map.values() {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(CompilationError::InvalidConditionalPathMap(target.clone()));
                    }
                }
            }
        }

        let start_edges: Vec<_> = self
            .edges
            .iter()
            .filter(|(f, _)| f == START)
            .map(|(_, t)| t.clone())
            .collect();
        let first = match start_edges.len() {
            1 => start_edges.into_iter().next().unwrap(),
            _ => return Err(CompilationError::MissingStart),
        };

        let has_end = self.edges.iter().any(|(_, t)| t == END)
            || self.conditional_edges.values().any(|r| {
                r.path_map
                    .as_ref()
                    .map_or(true, |m| m.values().any(|v| v == END))
            });
        if !has_end {
            return Err(CompilationError::MissingEnd);
        }

        let mut next_map: HashMap<String, NextEntry<S>> = HashMap::new();
        for (from, to) in self.edges.iter().filter(|(f, _)| f != START) {
            if next_map.insert(from.clone(), NextEntry::Unconditional(to.clone())).is_some() {
                return Err(CompilationError::DuplicateEdge(from.clone()));
            }
        }
        for (source, router) in &self.conditional_edges {
            if next_map.contains_key(source) {
                return Err(CompilationError::NodeHasBothEdgeAndConditional(
                    source.clone(),
                ));
            }
            next_map.insert(source.clone(), NextEntry::Conditional(router.clone()));
        }

        Ok(CompiledWorkflow {
            nodes: self.nodes,
            first_node_id: first,
            next_map,
            checkpointer,
            retry_policy: self.retry_policy,
            max_steps: self.max_steps,
        })
    }
}
