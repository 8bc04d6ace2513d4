//! The workflow catalogue: five graphs over the shared engine.
//!
//! - [`query`]: QueryDiagnostic — classify → macro/micro query → synthesize.
//! - [`device_exec`]: DeviceExecution — plan → approval gate → apply → verify.
//! - [`netbox`]: NetBoxManagement — diff → approval gate → apply.
//! - [`deepdive`]: DeepDive — decompose → bounded loop of sub-queries → synthesize.
//! - [`inspection`]: Inspection — enumerate scope → parallel probe → compare → report.
//!
//! All workflows share [`WorkflowState`](crate::state::WorkflowState) and the
//! collaborator bundle in [`context::WorkflowContext`].

pub mod context;
pub mod deepdive;
pub mod device_exec;
pub mod gate;
pub mod inspection;
pub mod netbox;
pub mod query;

use serde::{Deserialize, Serialize};

use crate::session::Role;

pub use context::WorkflowContext;

/// The workflow a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    QueryDiagnostic,
    DeviceExecution,
    NetBoxManagement,
    DeepDive,
    Inspection,
}

impl WorkflowKind {
    /// Whether this workflow can mutate devices or inventory.
    pub fn is_write(&self) -> bool {
        matches!(self, WorkflowKind::DeviceExecution | WorkflowKind::NetBoxManagement)
    }

    /// Role gate for the permission matrix: viewers get read-only workflows,
    /// writes and the expert deep-dive need operator or admin.
    pub fn allowed_for(&self, role: Role) -> bool {
        match self {
            WorkflowKind::QueryDiagnostic | WorkflowKind::Inspection => true,
            WorkflowKind::DeviceExecution | WorkflowKind::NetBoxManagement => {
                role.can_execute_writes()
            }
            WorkflowKind::DeepDive => role.can_deep_dive(),
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkflowKind::QueryDiagnostic => "query_diagnostic",
            WorkflowKind::DeviceExecution => "device_execution",
            WorkflowKind::NetBoxManagement => "netbox_management",
            WorkflowKind::DeepDive => "deep_dive",
            WorkflowKind::Inspection => "inspection",
        })
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query_diagnostic" => Ok(WorkflowKind::QueryDiagnostic),
            "device_execution" => Ok(WorkflowKind::DeviceExecution),
            "netbox_management" => Ok(WorkflowKind::NetBoxManagement),
            "deep_dive" => Ok(WorkflowKind::DeepDive),
            "inspection" => Ok(WorkflowKind::Inspection),
            other => Err(format!("unknown workflow kind: {other}")),
        }
    }
}

/// Output label of the intent classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    QuickQuery,
    DeviceInspection,
    DeepAnalysis,
    Configuration,
    Netbox,
    NonNetwork,
}

impl IntentKind {
    /// The workflow this intent routes to; `NonNetwork` routes nowhere.
    pub fn workflow(&self) -> Option<WorkflowKind> {
        match self {
            IntentKind::QuickQuery => Some(WorkflowKind::QueryDiagnostic),
            IntentKind::DeviceInspection => Some(WorkflowKind::Inspection),
            IntentKind::DeepAnalysis => Some(WorkflowKind::DeepDive),
            IntentKind::Configuration => Some(WorkflowKind::DeviceExecution),
            IntentKind::Netbox => Some(WorkflowKind::NetBoxManagement),
            IntentKind::NonNetwork => None,
        }
    }
}

/// Classifier verdict: intent plus confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentKind,
    pub confidence: f64,
}

/// Scratch keys shared between the dispatcher and workflow nodes.
pub mod scratch_keys {
    /// [`super::Classification`] stored by the dispatcher.
    pub const CLASSIFICATION: &str = "classification";
    /// Target device name detected in the request, when any.
    pub const TARGET_DEVICE: &str = "target_device";
    /// `true` when the caller's role may skip the approval gate.
    pub const AUTO_APPROVE: &str = "auto_approve";
    /// [`super::PlanSummary`] produced by plan/diff nodes.
    pub const PLAN: &str = "plan";
    /// Call id of the write tool call held at the gate.
    pub const PENDING_CALL: &str = "pending_call";
    /// Serialized inspection profile, set by the job layer.
    pub const INSPECTION_PROFILE: &str = "inspection_profile";
    /// Per-device outcomes of the probe step.
    pub const OUTCOMES: &str = "outcomes";
    /// Report id written by the render step.
    pub const REPORT_ID: &str = "report_id";
    /// Deep-dive task list and collected findings.
    pub const TASKS: &str = "tasks";
    pub const FINDINGS: &str = "findings";
}

/// What a gated write intends to do; feeds the interrupt's execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub device: String,
    #[serde(default)]
    pub devices: Vec<String>,
    pub operation: String,
    pub commands: Vec<String>,
    pub risk_level: crate::graph::RiskLevel,
}

impl PlanSummary {
    pub fn to_execution_plan(&self) -> crate::graph::ExecutionPlan {
        crate::graph::ExecutionPlan {
            device: self.device.clone(),
            operation: self.operation.clone(),
            commands: self.commands.clone(),
            devices: self.devices.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Intent-to-workflow routing matches the classifier labels and
    /// non_network routes nowhere.
    #[test]
    fn intent_routing() {
        assert_eq!(IntentKind::QuickQuery.workflow(), Some(WorkflowKind::QueryDiagnostic));
        assert_eq!(IntentKind::DeviceInspection.workflow(), Some(WorkflowKind::Inspection));
        assert_eq!(IntentKind::DeepAnalysis.workflow(), Some(WorkflowKind::DeepDive));
        assert_eq!(IntentKind::Configuration.workflow(), Some(WorkflowKind::DeviceExecution));
        assert_eq!(IntentKind::Netbox.workflow(), Some(WorkflowKind::NetBoxManagement));
        assert_eq!(IntentKind::NonNetwork.workflow(), None);
    }

    /// **Scenario**: Viewers are confined to read-only workflows.
    #[test]
    fn viewer_confinement() {
        assert!(WorkflowKind::QueryDiagnostic.allowed_for(Role::Viewer));
        assert!(WorkflowKind::Inspection.allowed_for(Role::Viewer));
        assert!(!WorkflowKind::DeviceExecution.allowed_for(Role::Viewer));
        assert!(!WorkflowKind::NetBoxManagement.allowed_for(Role::Viewer));
        assert!(!WorkflowKind::DeepDive.allowed_for(Role::Viewer));
        assert!(WorkflowKind::DeviceExecution.allowed_for(Role::Operator));
    }

    /// **Scenario**: Workflow kinds round-trip through their wire names.
    #[test]
    fn kind_names_roundtrip() {
        for kind in [
            WorkflowKind::QueryDiagnostic,
            WorkflowKind::DeviceExecution,
            WorkflowKind::NetBoxManagement,
            WorkflowKind::DeepDive,
            WorkflowKind::Inspection,
        ] {
            assert_eq!(kind.to_string().parse::<WorkflowKind>().unwrap(), kind);
        }
    }
}
