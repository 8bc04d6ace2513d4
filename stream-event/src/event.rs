//! Protocol-level event types: `type` discriminator + payload.
//!
//! Field names are part of the wire contract; the serialization tests pin them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reasoning-trace phase attached to a `thinking` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStep {
    Hypothesis,
    Verification,
    Conclusion,
    Reasoning,
}

/// Risk classification carried by an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Decisions a human may take on an interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Edit,
    Reject,
}

/// Terminal status reported on `done`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Completed,
    Interrupted,
    Failed,
    Cancelled,
    Refused,
}

/// What a write-affecting tool call intends to do, shown to the approver.
///
/// `device` is the primary target (the only one for single-device operations);
/// `devices` lists the full batch when the operation fans out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub device: String,
    pub operation: String,
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
}

/// One stream event: wire shape (`type` + payload).
///
/// The envelope (`thread_id`, `seq`) is applied separately per line; see
/// [`StreamEnvelope`](crate::StreamEnvelope).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// Incremental text token from the model.
    Token { content: String },
    /// Reasoning trace.
    Thinking {
        step: ThinkingStep,
        content: String,
    },
    /// Tool execution begun.
    ToolStart {
        call_id: String,
        name: String,
        display_name: String,
        arguments: Value,
    },
    /// Tool execution finished.
    ToolEnd {
        call_id: String,
        success: bool,
        duration_ms: u64,
        summary: String,
    },
    /// Human approval required; the stream pauses after this event.
    Interrupt {
        thread_id: String,
        call_id: String,
        message: String,
        risk_level: RiskLevel,
        execution_plan: ExecutionPlan,
        allowed_decisions: Vec<DecisionKind>,
    },
    /// Non-fatal or fatal error. `code` is the stable contract; `message` is not.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    /// Terminal event; the stream closes after this.
    Done {
        final_status: FinalStatus,
        #[serde(default)]
        truncated: bool,
    },
}

impl WireEvent {
    /// Serializes this event to a JSON object (type + payload only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// True for events that must never be dropped under back-pressure.
    pub fn is_critical(&self) -> bool {
        !matches!(self, WireEvent::Token { .. } | WireEvent::Thinking { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: The `type` tags and field names match the documented wire contract.
    #[test]
    fn wire_tags_match_contract() {
        let v = WireEvent::Token {
            content: "hi".into(),
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "token");
        assert_eq!(v["content"], "hi");

        let v = WireEvent::Thinking {
            step: ThinkingStep::Hypothesis,
            content: "check BGP".into(),
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "thinking");
        assert_eq!(v["step"], "hypothesis");

        let v = WireEvent::ToolStart {
            call_id: "c1".into(),
            name: "smart_query".into(),
            display_name: "Smart query".into(),
            arguments: serde_json::json!({"device": "R1"}),
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "tool_start");
        assert_eq!(v["arguments"]["device"], "R1");

        let v = WireEvent::Done {
            final_status: FinalStatus::Completed,
            truncated: false,
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "done");
        assert_eq!(v["final_status"], "completed");
    }

    /// **Scenario**: Interrupt events carry plan, risk, and allowed decisions on the wire.
    #[test]
    fn interrupt_event_shape() {
        let v = WireEvent::Interrupt {
            thread_id: "cli-1".into(),
            call_id: "c9".into(),
            message: "approve config change".into(),
            risk_level: RiskLevel::High,
            execution_plan: ExecutionPlan {
                device: "R1".into(),
                operation: "shut_interface".into(),
                commands: vec!["interface Loopback100".into(), "shutdown".into()],
                devices: vec![],
            },
            allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Reject],
        }
        .to_value()
        .unwrap();
        assert_eq!(v["type"], "interrupt");
        assert_eq!(v["risk_level"], "high");
        assert_eq!(v["execution_plan"]["device"], "R1");
        assert_eq!(v["allowed_decisions"][0], "approve");
        // Empty batch list stays off the wire.
        assert!(v["execution_plan"].get("devices").is_none());
    }

    /// **Scenario**: Events round-trip through serde (client-side decode).
    #[test]
    fn event_roundtrip() {
        let ev = WireEvent::ToolEnd {
            call_id: "c1".into(),
            success: true,
            duration_ms: 42,
            summary: "ok".into(),
        };
        let text = serde_json::to_string(&ev).unwrap();
        let back: WireEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(ev, back);
    }

    /// **Scenario**: Only token and thinking events are droppable under back-pressure.
    #[test]
    fn critical_event_classification() {
        assert!(!WireEvent::Token { content: "x".into() }.is_critical());
        assert!(!WireEvent::Thinking {
            step: ThinkingStep::Reasoning,
            content: "x".into()
        }
        .is_critical());
        assert!(WireEvent::Error {
            code: "internal_error".into(),
            message: "x".into(),
            recoverable: true
        }
        .is_critical());
        assert!(WireEvent::Done {
            final_status: FinalStatus::Failed,
            truncated: true
        }
        .is_critical());
    }
}
