//! Next-step result from a workflow node: continue, jump, or end.

/// Next step after running a node.
///
/// - **Continue**: follow the node's outgoing edge (or END if none).
/// - **Node(id)**: jump to the given node (used by looping workflows).
/// - **End**: stop; current state is the final result.
///
/// **Interaction**: Returned by `Node::run`; consumed by the `CompiledWorkflow`
/// run loop. Ignored when the node has conditional edges (the router decides).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Next {
    /// Follow the node's outgoing edge; if there is none, equivalent to End.
    Continue,
    /// Run the node with the given id next.
    Node(String),
    /// Stop and return the current state.
    End,
}
