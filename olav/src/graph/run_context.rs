//! Per-run context handed to every node.
//!
//! Bundles the thread id, the cooperative cancellation token, and the stream
//! emitter. The engine checks the token at node boundaries; nodes should also
//! pass it into outbound tool calls so long operations abort promptly.

use tokio_util::sync::CancellationToken;

use crate::stream::StreamEmitter;

/// Run-scoped context for one workflow invocation.
#[derive(Clone)]
pub struct RunContext {
    /// Thread this run belongs to.
    pub thread_id: String,
    /// Cooperative cancellation signal; observed at node boundaries and inside
    /// long-running tool calls.
    pub cancel: CancellationToken,
    /// Stream emitter for tokens, thinking traces, and tool lifecycle events.
    pub emitter: StreamEmitter,
}

impl RunContext {
    pub fn new(thread_id: impl Into<String>, emitter: StreamEmitter) -> Self {
        Self {
            thread_id: thread_id.into(),
            cancel: CancellationToken::new(),
            emitter,
        }
    }

    /// Context with an externally owned cancellation token (jobs, HTTP streams).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Detached context for tests and background work: sink emitter, own token.
    pub fn detached(thread_id: impl Into<String>) -> Self {
        Self::new(thread_id, StreamEmitter::sink())
    }
}
