//! Conditional edges: route to the next node based on state.
//!
//! A source node carries a pure routing function `(state) -> key`; the key is
//! either used directly as the next node id or looked up in an optional path map.
//!
//! **Interaction**: Stored by `WorkflowGraph::add_conditional_edges`; resolved in
//! the `CompiledWorkflow` run loop after the source node runs.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Router function: takes a reference to state and returns a routing key.
pub type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// Conditional edge definition: routing function plus optional path map.
///
/// - `path_map` of `None`: the router's return value is the next node id (or END).
/// - `path_map` of `Some(map)`: `next_id = map[key]` when present, otherwise the
///   key itself (so direct node ids remain valid keys).
#[derive(Clone)]
pub struct ConditionalRouter<S> {
    pub(super) path: RouterFn<S>,
    pub(super) path_map: Option<HashMap<String, String>>,
}

impl<S> ConditionalRouter<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new(path: RouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id (or END) from the current state.
    pub fn resolve_next(&self, state: &S) -> String {
        let key = (self.path)(state);
        self.path_map
            .as_ref()
            .and_then(|m| m.get(&key))
            .cloned()
            .unwrap_or(key)
    }
}

/// How the next node is chosen after a given node runs.
#[derive(Clone)]
pub enum NextEntry<S> {
    /// Single fixed next node (or END); the node's `Next` is still respected.
    Unconditional(String),
    /// Router decides from state; the node's `Next` is ignored.
    Conditional(ConditionalRouter<S>),
}
