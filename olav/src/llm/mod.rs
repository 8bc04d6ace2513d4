//! LLM client seam.
//!
//! The core never talks to a concrete provider; workflow nodes and catalogue
//! tools depend on [`LlmClient`] only. [`MockLlm`] serves tests with scripted
//! replies.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Retriable provider failure (connection reset, 5xx).
    #[error("transient: {0}")]
    Transient(String),
    #[error("llm failed: {0}")]
    Failed(String),
}

/// Chat-completion seam used by workflow nodes and catalogue tools.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Completes the conversation with one assistant reply.
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}

/// Scripted client for tests: replies are popped in push order; when the queue
/// is empty the default reply is returned.
pub struct MockLlm {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
}

impl MockLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock llm lock")
            .push_back(reply.into());
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        let mut queue = self.replies.lock().expect("mock llm lock");
        Ok(queue
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Scripted replies pop in order, then the default is returned.
    #[tokio::test]
    async fn mock_replies_in_order_then_default() {
        let llm = MockLlm::new("default");
        llm.push_reply("first");
        llm.push_reply("second");
        let msgs = vec![Message::user("hi")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "first");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "default");
    }
}
