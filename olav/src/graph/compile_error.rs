//! Workflow graph compilation error.
//!
//! Returned by `WorkflowGraph::compile` when edges reference unknown nodes or the
//! graph has no usable entry/exit. Structural mistakes surface at startup, not
//! mid-conversation.

use thiserror::Error;

/// Error when compiling a workflow graph.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// A node id referenced by an edge was not registered (and is not START/END).
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No edge from START, or more than one.
    #[error("graph must have exactly one edge from START")]
    MissingStart,

    /// Nothing reaches END: no unconditional edge to END and no conditional
    /// path that can produce it.
    #[error("graph has no path to END")]
    MissingEnd,

    /// A node has two unconditional outgoing edges.
    #[error("node has duplicate outgoing edges: {0}")]
    DuplicateEdge(String),

    /// A node has both an outgoing edge and conditional edges.
    #[error("node has both edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    /// A conditional path_map value is not a registered node id or END.
    #[error("conditional path_map invalid target: {0}")]
    InvalidConditionalPathMap(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of each variant names the offending node or structure.
    #[test]
    fn display_mentions_offender() {
        assert!(CompilationError::NodeNotFound("gate".into())
            .to_string()
            .contains("gate"));
        assert!(CompilationError::MissingStart.to_string().contains("START"));
        assert!(CompilationError::MissingEnd.to_string().contains("END"));
        assert!(CompilationError::DuplicateEdge("plan".into())
            .to_string()
            .contains("plan"));
        assert!(
            CompilationError::NodeHasBothEdgeAndConditional("classify".into())
                .to_string()
                .contains("classify")
        );
        assert!(CompilationError::InvalidConditionalPathMap("missing".into())
            .to_string()
            .contains("missing"));
    }
}
