//! Conversation message types.
//!
//! Roles: System (usually first), User, Assistant, and Tool for tool outputs
//! merged back into the conversation. Used by thread history and by
//! `WorkflowState::messages`.

use serde::{Deserialize, Serialize};

/// A single message in a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "snake_case")]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System(String),
    /// Operator input.
    User(String),
    /// Model/workflow reply.
    Assistant(String),
    /// Output of a tool call, folded back into the conversation.
    Tool(ToolMessage),
}

/// Payload of a tool message: which tool produced it and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub name: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool(ToolMessage {
            name: name.into(),
            content: content.into(),
        })
    }

    /// Role discriminator as it appears on the wire.
    pub fn role(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::Tool(_) => "tool",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Constructors produce the expected variant and role.
    #[test]
    fn constructors_and_roles() {
        assert_eq!(Message::system("s").role(), "system");
        assert_eq!(Message::user("u").role(), "user");
        assert_eq!(Message::assistant("a").role(), "assistant");
        let t = Message::tool("smart_query", "ok");
        assert_eq!(t.role(), "tool");
        assert!(matches!(t, Message::Tool(ref m) if m.name == "smart_query"));
    }

    /// **Scenario**: Messages round-trip through serde with a `role` tag.
    #[test]
    fn serde_roundtrip_with_role_tag() {
        let msg = Message::tool("batch_query", "{\"R1\":\"ok\"}");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(msg, back);
    }
}
