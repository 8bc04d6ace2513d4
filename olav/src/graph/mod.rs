//! Workflow graph engine: typed state graphs with checkpointed interruption.
//!
//! - [`WorkflowGraph`]: builder (nodes, edges, conditional routing).
//! - [`CompiledWorkflow`]: immutable runner with per-node checkpoints, a runtime
//!   step bound, cooperative cancellation, and interrupt/resume support.
//! - [`Node`]: one step, state in → (state, [`Next`]) out.
//! - [`interrupt`]: HITL pause/resume payloads.

pub mod compile_error;
pub mod compiled;
pub mod conditional;
pub mod interrupt;
pub mod next;
pub mod node;
pub mod retry;
pub mod run_context;
pub mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::CompiledWorkflow;
pub use conditional::{ConditionalRouter, NextEntry, RouterFn};
pub use interrupt::{DecisionKind, ExecutionPlan, InterruptRequest, ResumeDecision, RiskLevel};
pub use next::Next;
pub use node::Node;
pub use retry::RetryPolicy;
pub use run_context::RunContext;
pub use state_graph::{WorkflowGraph, DEFAULT_MAX_STEPS, END, START};
