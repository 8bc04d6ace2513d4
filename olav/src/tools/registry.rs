//! Tool registry: process-lifetime mapping from name to spec + handler.
//!
//! Built mutably during startup, then shared as `Arc<ToolRegistry>` — after
//! initialization it is immutable and reads take no lock. `invoke` validates
//! arguments, applies the per-tool timeout, and retries read-path transient
//! failures once; a second transient surfaces as `Unreachable`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;
use crate::tools::call::{ToolCall, ToolCallStatus};
use crate::tools::spec::{SideEffect, ToolSpec};

/// Error from tool registration or invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("bad arguments: {0}")]
    BadArguments(String),
    /// Same name registered again without a version change.
    #[error("duplicate tool name without version change: {0}")]
    DuplicateName(String),
    /// A device scope resolved to zero devices.
    #[error("empty scope: {0}")]
    EmptyScope(String),
    /// Retriable failure (connection reset, short timeout).
    #[error("transient: {0}")]
    Transient(String),
    /// Target not reachable after the read-path retry.
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    /// Categorized handler failure; carried to the caller as the call result.
    #[error("tool failed: {0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<ToolError> for OrchestratorError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound(m) => OrchestratorError::NotFound(m),
            ToolError::BadArguments(m) => OrchestratorError::BadArguments(m),
            ToolError::DuplicateName(m) => OrchestratorError::Conflict(m),
            ToolError::EmptyScope(m) => OrchestratorError::EmptyScope(m),
            ToolError::Transient(m) => OrchestratorError::Transient(m),
            ToolError::Unreachable(m) => OrchestratorError::Unreachable(m),
            ToolError::Timeout(d) => OrchestratorError::Timeout(format!("tool call after {d:?}")),
            ToolError::Failed(m) => OrchestratorError::Internal(m),
            ToolError::Cancelled => OrchestratorError::Cancelled,
        }
    }
}

/// Per-call context passed to handlers: cancellation plus the owning thread.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub thread_id: Option<String>,
}

impl ToolContext {
    pub fn for_thread(thread_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            thread_id: Some(thread_id.into()),
        }
    }
}

/// Handler binding for one tool. Handlers return a typed success value or a
/// categorized [`ToolError`]; nothing uncategorized crosses this boundary.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Process-wide tool registry.
///
/// **Interaction**: Populated once at startup; workflow nodes invoke tools
/// through `Arc<ToolRegistry>`. The workflow engine depends only on specs and
/// [`ToolHandler`], never on concrete handler types.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout,
        }
    }

    /// Registers a tool. Idempotent replacement requires a version change;
    /// re-registering the same name and version is a conflict.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        if let Some(existing) = self.tools.get(&spec.name) {
            if existing.spec.version == spec.version {
                return Err(ToolError::DuplicateName(spec.name));
            }
        }
        self.tools
            .insert(spec.name.clone(), RegisteredTool { spec, handler });
        Ok(())
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn list(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<_> = self.tools.values().map(|t| &t.spec).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Runs one call through validation, timeout, and the read-path retry.
    /// The call record is updated in place (status, result, timestamps).
    pub async fn invoke(&self, call: &mut ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.tool_name)
            .ok_or_else(|| ToolError::NotFound(call.tool_name.clone()))?;
        tool.spec.validate_args(&call.arguments)?;

        call.status = ToolCallStatus::Running;
        call.started_at = Some(Utc::now());

        let mut result = self.run_handler(tool, call, ctx).await;
        if matches!(result, Err(ToolError::Transient(_)))
            && tool.spec.side_effect == SideEffect::Read
        {
            tracing::debug!(tool = %call.tool_name, "transient read failure, retrying once");
            result = match self.run_handler(tool, call, ctx).await {
                Err(ToolError::Transient(m)) => Err(ToolError::Unreachable(m)),
                other => other,
            };
        }

        call.ended_at = Some(Utc::now());
        match &result {
            Ok(value) => {
                call.status = ToolCallStatus::Succeeded;
                call.result = Some(value.clone());
            }
            Err(ToolError::Cancelled) => call.status = ToolCallStatus::Cancelled,
            Err(e) => {
                call.status = ToolCallStatus::Failed;
                call.result = Some(serde_json::json!({"error": e.to_string()}));
            }
        }
        result
    }

    async fn run_handler(
        &self,
        tool: &RegisteredTool,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let timeout = self.default_timeout;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            outcome = tokio::time::timeout(
                timeout,
                tool.handler.handle(call.arguments.clone(), ctx),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(timeout)),
            },
        }
    }
}
