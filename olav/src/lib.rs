//! # Olav core
//!
//! The workflow orchestration & streaming core of a network-operations ChatOps
//! platform: a durable, checkpointed workflow engine; a dispatcher that
//! classifies requests and routes them to workflows; concurrent device fan-out
//! with human-in-the-loop gates for writes; a detached job layer for batch
//! inspections; per-thread event streaming with bounded buffering; and a
//! two-tier session/auth model.
//!
//! ## Design principles
//!
//! - **One state type per workflow family**: every graph flows
//!   [`WorkflowState`] through its nodes, checkpointed after each step.
//! - **Typed errors at every boundary**: the documented kinds live in
//!   [`OrchestratorError`]; `code()` is the wire contract.
//! - **External collaborators behind narrow traits**: LLM ([`LlmClient`]),
//!   device I/O ([`DeviceAdapter`]), inventory ([`Inventory`]), retrieval
//!   ([`Retriever`]), and every store have in-memory and (where persistent)
//!   SQLite implementations.
//! - **Cooperative cancellation**: tokens are observed at node boundaries and
//!   inside outbound calls; hard kill is not supported.
//!
//! ## Main modules
//!
//! - [`graph`]: [`WorkflowGraph`], [`CompiledWorkflow`], [`Node`], interrupts.
//! - [`checkpoint`]: [`Checkpointer`], [`MemorySaver`], [`SqliteSaver`].
//! - [`tools`]: [`ToolRegistry`], schemas, the built-in catalogue.
//! - [`fanout`]: bounded per-device execution with partial success.
//! - [`workflows`]: the five workflow graphs.
//! - [`dispatch`]: [`Dispatcher`], threads, routing policy.
//! - [`jobs`]: [`JobManager`], job stores.
//! - [`session`]: [`SessionManager`], roles, token model.
//! - [`stream`]: [`StreamEmitter`] with the bounded-buffer drop policy.

pub mod bootstrap;
pub mod checkpoint;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod inventory;
pub mod jobs;
pub mod knowledge;
pub mod llm;
pub mod message;
pub mod report;
pub mod session;
pub mod state;
pub mod stream;
pub mod tools;
pub mod workflows;

pub use bootstrap::{Collaborators, Orchestrator};
pub use checkpoint::{Checkpointer, MemorySaver, SqliteSaver};
pub use device::{DeviceAdapter, MockAdapter};
pub use dispatch::{Dispatcher, StreamRequest, Thread, ThreadStatus, ThreadStore};
pub use error::OrchestratorError;
pub use fanout::{FanOut, FanOutConfig, Outcome};
pub use graph::{
    CompiledWorkflow, DecisionKind, InterruptRequest, Node, ResumeDecision, RunContext,
    WorkflowGraph,
};
pub use inventory::{Device, DeviceScope, Inventory, StaticInventory};
pub use jobs::{InspectionJob, JobManager, JobStatus, JobStore};
pub use knowledge::{KnowledgeSources, Retriever};
pub use llm::{LlmClient, MockLlm};
pub use message::Message;
pub use report::{Report, ReportStore};
pub use session::{Role, Session, SessionManager, SessionStore};
pub use state::{Progress, WorkflowState};
pub use stream::StreamEmitter;
pub use tools::{ToolCall, ToolRegistry};
pub use workflows::{WorkflowContext, WorkflowKind};
