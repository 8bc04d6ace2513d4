//! Tool specifications as data: named parameters, types, required flags.
//!
//! Arguments are validated against the spec before any handler runs; a schema
//! violation is `BadArguments` and the handler is never invoked.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolError;

/// Whether a tool only reads or can mutate devices/stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Read,
    Write,
}

/// Declared type of one tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// One named tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }
}

/// A tool's declared contract: parameters, side effect, approval requirement.
///
/// Names are unique per registry; re-registering a name requires a version bump.
/// Write tools must set `requires_approval` unless explicitly allowlisted for
/// the caller's role — the registry enforces the write⇒approval default at
/// registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub version: u32,
    /// Shown in `tool_start` events and approval prompts.
    pub display_name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub side_effect: SideEffect,
    pub requires_approval: bool,
}

impl ToolSpec {
    /// A read-only tool never requiring approval.
    pub fn read(name: &str, display_name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            display_name: display_name.into(),
            description: description.into(),
            params,
            side_effect: SideEffect::Read,
            requires_approval: false,
        }
    }

    /// A write tool; always gated behind approval.
    pub fn write(name: &str, display_name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            display_name: display_name.into(),
            description: description.into(),
            params,
            side_effect: SideEffect::Write,
            requires_approval: true,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Validates `args` against this spec: must be an object, every required
    /// parameter present, every present parameter well-typed, no unknown keys.
    pub fn validate_args(&self, args: &Value) -> Result<(), ToolError> {
        let obj = args.as_object().ok_or_else(|| {
            ToolError::BadArguments(format!("{}: arguments must be an object", self.name))
        })?;
        for param in &self.params {
            match obj.get(&param.name) {
                Some(value) => {
                    if !param.kind.matches(value) {
                        return Err(ToolError::BadArguments(format!(
                            "{}: parameter '{}' expects {:?}",
                            self.name, param.name, param.kind
                        )));
                    }
                }
                None if param.required => {
                    return Err(ToolError::BadArguments(format!(
                        "{}: missing required parameter '{}'",
                        self.name, param.name
                    )));
                }
                None => {}
            }
        }
        for key in obj.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(ToolError::BadArguments(format!(
                    "{}: unknown parameter '{}'",
                    self.name, key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_spec() -> ToolSpec {
        ToolSpec::read(
            "smart_query",
            "Smart query",
            "Run a read-only query against one device",
            vec![
                ParamSpec::required("device", ParamKind::String, "device name"),
                ParamSpec::required("intent", ParamKind::String, "what to look at"),
                ParamSpec::optional("limit", ParamKind::Integer, "max rows"),
            ],
        )
    }

    /// **Scenario**: Well-formed arguments pass; optional parameters may be absent.
    #[test]
    fn valid_args_pass() {
        let spec = sample_spec();
        assert!(spec
            .validate_args(&json!({"device": "R1", "intent": "bgp_status"}))
            .is_ok());
        assert!(spec
            .validate_args(&json!({"device": "R1", "intent": "bgp_status", "limit": 5}))
            .is_ok());
    }

    /// **Scenario**: Missing required, wrong type, unknown key, and non-object
    /// arguments each fail with BadArguments.
    #[test]
    fn invalid_args_fail() {
        let spec = sample_spec();
        for bad in [
            json!({"intent": "bgp_status"}),
            json!({"device": 7, "intent": "bgp_status"}),
            json!({"device": "R1", "intent": "bgp_status", "extra": true}),
            json!(["not", "an", "object"]),
        ] {
            match spec.validate_args(&bad) {
                Err(ToolError::BadArguments(_)) => {}
                other => panic!("expected BadArguments for {bad}, got {other:?}"),
            }
        }
    }

    /// **Scenario**: Write constructor defaults to requiring approval.
    #[test]
    fn write_requires_approval() {
        let spec = ToolSpec::write("apply_config", "Apply config", "push device config", vec![]);
        assert_eq!(spec.side_effect, SideEffect::Write);
        assert!(spec.requires_approval);
    }
}
