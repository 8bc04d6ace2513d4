//! Interrupt and resume types for human-in-the-loop gates.
//!
//! A node that needs approval returns `OrchestratorError::Interrupted` carrying an
//! [`InterruptRequest`]; the engine checkpoints and halts. Execution continues only
//! when a valid [`ResumeDecision`] arrives for the same `(thread_id, call_id)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use stream_event::{DecisionKind, ExecutionPlan, RiskLevel};

use stream_event::WireEvent;

/// Pause-for-approval payload: what the human must decide and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub thread_id: String,
    /// The gated tool call.
    pub call_id: String,
    /// Human-readable description of the pending operation.
    pub message: String,
    pub risk_level: RiskLevel,
    /// Device(s), operation, and proposed commands.
    pub execution_plan: ExecutionPlan,
    /// Decisions this gate accepts.
    pub allowed_decisions: Vec<DecisionKind>,
}

impl InterruptRequest {
    /// Wire representation: the `interrupt` stream event.
    pub fn to_wire_event(&self) -> WireEvent {
        WireEvent::Interrupt {
            thread_id: self.thread_id.clone(),
            call_id: self.call_id.clone(),
            message: self.message.clone(),
            risk_level: self.risk_level,
            execution_plan: self.execution_plan.clone(),
            allowed_decisions: self.allowed_decisions.clone(),
        }
    }

    /// Whether the gate accepts the given decision kind.
    pub fn allows(&self, decision: DecisionKind) -> bool {
        self.allowed_decisions.contains(&decision)
    }
}

/// Reply to an interrupt; injected into the checkpointed state before re-running
/// the gate node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeDecision {
    pub thread_id: String,
    pub call_id: String,
    pub decision: DecisionKind,
    /// Replacement arguments when `decision == Edit`; validated against the tool
    /// schema before the call runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> InterruptRequest {
        InterruptRequest {
            thread_id: "cli-1".into(),
            call_id: "c1".into(),
            message: "apply interface shutdown".into(),
            risk_level: RiskLevel::High,
            execution_plan: ExecutionPlan {
                device: "R1".into(),
                operation: "shut_interface".into(),
                commands: vec!["interface Loopback100".into(), "shutdown".into()],
                devices: vec![],
            },
            allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Reject],
        }
    }

    /// **Scenario**: The wire event mirrors the request fields.
    #[test]
    fn wire_event_mirrors_request() {
        let req = sample_request();
        let v = req.to_wire_event().to_value().unwrap();
        assert_eq!(v["type"], "interrupt");
        assert_eq!(v["call_id"], "c1");
        assert_eq!(v["execution_plan"]["operation"], "shut_interface");
    }

    /// **Scenario**: `allows` reflects the gate's decision set.
    #[test]
    fn allows_reflects_decision_set() {
        let req = sample_request();
        assert!(req.allows(DecisionKind::Approve));
        assert!(req.allows(DecisionKind::Reject));
        assert!(!req.allows(DecisionKind::Edit));
    }

    /// **Scenario**: ResumeDecision omits optional fields from the wire when unset.
    #[test]
    fn resume_decision_optional_fields() {
        let d = ResumeDecision {
            thread_id: "cli-1".into(),
            call_id: "c1".into(),
            decision: DecisionKind::Approve,
            edited_arguments: None,
            rejection_reason: None,
        };
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("edited_arguments").is_none());
        assert!(v.get("rejection_reason").is_none());
    }
}
