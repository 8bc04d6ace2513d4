//! Tool layer: schema-aware, registry-bound capabilities.
//!
//! - [`ToolSpec`]/[`ParamSpec`]: parameter schemas as data, validated before any
//!   handler runs.
//! - [`ToolRegistry`]: process-lifetime name → tool mapping; immutable after
//!   startup, so reads take no lock.
//! - [`ToolCall`]: one invocation with its lifecycle status.
//! - [`catalogue`]: the built-in tools (classifier, queries, search, recall,
//!   plan/apply/verify, NetBox diff/apply, report generator).

pub mod catalogue;

mod call;
mod registry;
mod spec;

pub use call::{ToolCall, ToolCallStatus};
pub use registry::{ToolContext, ToolError, ToolHandler, ToolRegistry};
pub use spec::{ParamKind, ParamSpec, SideEffect, ToolSpec};
