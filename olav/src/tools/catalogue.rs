//! Built-in tool catalogue: the capabilities workflow nodes invoke.
//!
//! Handlers bind the external collaborator seams (LLM, device adapter,
//! inventory, knowledge sources, report store) behind the uniform
//! [`ToolHandler`](crate::tools::ToolHandler) contract. The registry and the
//! workflow engine never see the concrete types.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::device::DeviceAdapter;
use crate::fanout::{FanOut, OpKind, Outcome};
use crate::inventory::{DeviceScope, Inventory, InventoryChange};
use crate::knowledge::KnowledgeSources;
use crate::llm::LlmClient;
use crate::message::Message;
use crate::report::{render_inspection_report, Report, ReportStore};
use crate::tools::{
    ParamKind, ParamSpec, ToolContext, ToolError, ToolHandler, ToolRegistry, ToolSpec,
};

pub const TOOL_INTENT_CLASSIFIER: &str = "intent_classifier";
pub const TOOL_SMART_QUERY: &str = "smart_query";
pub const TOOL_BATCH_QUERY: &str = "batch_query";
pub const TOOL_SCHEMA_SEARCH: &str = "schema_search";
pub const TOOL_MEMORY_RECALL: &str = "memory_recall";
pub const TOOL_REPORT_GENERATOR: &str = "report_generator";
pub const TOOL_PLAN_CONFIG: &str = "plan_config";
pub const TOOL_APPLY_CONFIG: &str = "apply_config";
pub const TOOL_VERIFY_CONFIG: &str = "verify_config";
pub const TOOL_NETBOX_DIFF: &str = "netbox_diff";
pub const TOOL_NETBOX_APPLY: &str = "netbox_apply";

/// Collaborator handles the catalogue binds against.
#[derive(Clone)]
pub struct CatalogueDeps {
    pub llm: Arc<dyn LlmClient>,
    pub inventory: Arc<dyn Inventory>,
    pub adapter: Arc<dyn DeviceAdapter>,
    pub knowledge: KnowledgeSources,
    pub reports: Arc<dyn ReportStore>,
    pub fanout: FanOut,
}

/// Registers every built-in tool. Called once at startup.
pub fn register_catalogue(
    registry: &mut ToolRegistry,
    deps: &CatalogueDeps,
) -> Result<(), ToolError> {
    registry.register(
        ToolSpec::read(
            TOOL_INTENT_CLASSIFIER,
            "Intent classifier",
            "Classify a request into a workflow kind with a confidence score",
            vec![ParamSpec::required("text", ParamKind::String, "the user request")],
        ),
        Arc::new(IntentClassifierTool { llm: deps.llm.clone() }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_SMART_QUERY,
            "Smart query",
            "Select and run one platform-appropriate read-only command on a device",
            vec![
                ParamSpec::required("text", ParamKind::String, "what to find out"),
                ParamSpec::required("device", ParamKind::String, "target device name"),
            ],
        ),
        Arc::new(SmartQueryTool {
            llm: deps.llm.clone(),
            inventory: deps.inventory.clone(),
            adapter: deps.adapter.clone(),
        }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_BATCH_QUERY,
            "Batch query",
            "Run read-only commands across a device scope; partial success is normal",
            vec![
                ParamSpec::required("scope", ParamKind::String, "device scope expression"),
                ParamSpec::required("commands", ParamKind::Array, "commands to run per device"),
            ],
        ),
        Arc::new(BatchQueryTool {
            inventory: deps.inventory.clone(),
            adapter: deps.adapter.clone(),
            fanout: deps.fanout.clone(),
        }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_SCHEMA_SEARCH,
            "Schema search",
            "Find device data tables/fields matching a phrase",
            vec![
                ParamSpec::required("text", ParamKind::String, "search phrase"),
                ParamSpec::optional("k", ParamKind::Integer, "max results"),
            ],
        ),
        Arc::new(SchemaSearchTool { knowledge: deps.knowledge.clone() }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_MEMORY_RECALL,
            "Memory recall",
            "Recall prior successful workflow traces similar to a phrase",
            vec![
                ParamSpec::required("text", ParamKind::String, "search phrase"),
                ParamSpec::optional("k", ParamKind::Integer, "max results"),
            ],
        ),
        Arc::new(MemoryRecallTool { knowledge: deps.knowledge.clone() }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_REPORT_GENERATOR,
            "Report generator",
            "Render and persist an inspection report from per-device outcomes",
            vec![
                ParamSpec::required("inspection_id", ParamKind::String, "inspection profile id"),
                ParamSpec::required("title", ParamKind::String, "report title"),
                ParamSpec::required("results", ParamKind::Object, "device name to outcome"),
            ],
        ),
        Arc::new(ReportGeneratorTool { reports: deps.reports.clone() }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_PLAN_CONFIG,
            "Plan config change",
            "Draft the device commands for a requested change, without touching the device",
            vec![
                ParamSpec::required("text", ParamKind::String, "requested change"),
                ParamSpec::required("device", ParamKind::String, "target device name"),
            ],
        ),
        Arc::new(PlanConfigTool {
            llm: deps.llm.clone(),
            inventory: deps.inventory.clone(),
        }),
    )?;
    registry.register(
        ToolSpec::write(
            TOOL_APPLY_CONFIG,
            "Apply config",
            "Push an approved config change to a device",
            vec![
                ParamSpec::required("device", ParamKind::String, "target device name"),
                ParamSpec::required("commands", ParamKind::Array, "config lines to push"),
            ],
        ),
        Arc::new(ApplyConfigTool {
            inventory: deps.inventory.clone(),
            adapter: deps.adapter.clone(),
        }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_VERIFY_CONFIG,
            "Verify config",
            "Run a read-only verification command after a change",
            vec![
                ParamSpec::required("device", ParamKind::String, "target device name"),
                ParamSpec::optional("command", ParamKind::String, "verification command"),
            ],
        ),
        Arc::new(VerifyConfigTool {
            inventory: deps.inventory.clone(),
            adapter: deps.adapter.clone(),
        }),
    )?;
    registry.register(
        ToolSpec::read(
            TOOL_NETBOX_DIFF,
            "NetBox diff",
            "Diff an intended inventory value against the current record",
            vec![
                ParamSpec::required("device", ParamKind::String, "device name"),
                ParamSpec::required("field", ParamKind::String, "inventory field"),
                ParamSpec::required("value", ParamKind::String, "intended value"),
            ],
        ),
        Arc::new(NetboxDiffTool { inventory: deps.inventory.clone() }),
    )?;
    registry.register(
        ToolSpec::write(
            TOOL_NETBOX_APPLY,
            "NetBox apply",
            "Apply an approved inventory change",
            vec![
                ParamSpec::required("device", ParamKind::String, "device name"),
                ParamSpec::required("field", ParamKind::String, "inventory field"),
                ParamSpec::required("value", ParamKind::String, "new value"),
            ],
        ),
        Arc::new(NetboxApplyTool { inventory: deps.inventory.clone() }),
    )?;
    Ok(())
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::BadArguments(format!("missing string parameter '{key}'")))
}

fn commands_arg(args: &Value, key: &str) -> Result<Vec<String>, ToolError> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .ok_or_else(|| ToolError::BadArguments(format!("'{key}' must be a non-empty string array")))
}

const CLASSIFY_INSTRUCTION: &str = "Classify the operator request. Reply with JSON \
    {\"intent\": one of quick_query|device_inspection|deep_analysis|configuration|netbox|non_network, \
    \"confidence\": 0..1}.";

struct IntentClassifierTool {
    llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl ToolHandler for IntentClassifierTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = str_arg(&args, "text")?;
        let reply = self
            .llm
            .complete(&[Message::system(CLASSIFY_INSTRUCTION), Message::user(text)])
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(parse_classification(&reply))
    }
}

const INTENT_LABELS: [&str; 6] = [
    "quick_query",
    "device_inspection",
    "deep_analysis",
    "configuration",
    "netbox",
    "non_network",
];

/// Parses the model reply into `{intent, confidence}`. JSON replies are taken
/// verbatim when the label is known; otherwise the reply is scanned for a label.
/// Unparseable output degrades to quick_query with zero confidence so the
/// dispatcher's confidence floor takes over.
fn parse_classification(reply: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(reply) {
        if let Some(intent) = v.get("intent").and_then(Value::as_str) {
            if INTENT_LABELS.contains(&intent) {
                let confidence = v
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0);
                return json!({"intent": intent, "confidence": confidence});
            }
        }
    }
    for label in INTENT_LABELS {
        if reply.contains(label) {
            return json!({"intent": label, "confidence": 0.5});
        }
    }
    json!({"intent": "quick_query", "confidence": 0.0})
}

/// Commands that must never come back from a read-only command selection.
const WRITE_PREFIXES: [&str; 4] = ["configure", "write", "reload", "clear"];

struct SmartQueryTool {
    llm: Arc<dyn LlmClient>,
    inventory: Arc<dyn Inventory>,
    adapter: Arc<dyn DeviceAdapter>,
}

#[async_trait]
impl ToolHandler for SmartQueryTool {
    async fn handle(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = str_arg(&args, "text")?;
        let device_name = str_arg(&args, "device")?;
        let device = self
            .inventory
            .get(device_name)
            .await
            .map_err(|e| ToolError::BadArguments(e.to_string()))?;
        let prompt = format!(
            "Platform {}. Reply with exactly one read-only show command that answers: {text}",
            device.platform
        );
        let reply = self
            .llm
            .complete(&[Message::system(prompt), Message::user(text)])
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let command = reply.lines().next().unwrap_or("").trim().to_string();
        if command.is_empty()
            || WRITE_PREFIXES
                .iter()
                .any(|p| command.to_lowercase().starts_with(p))
        {
            return Err(ToolError::Failed(format!(
                "model did not produce a read-only command: {command:?}"
            )));
        }
        let output = self
            .adapter
            .run_command(&device, &command, &ctx.cancel)
            .await
            .map_err(|e| match e {
                crate::device::AdapterError::Transient(m) => ToolError::Transient(m),
                crate::device::AdapterError::Unreachable(m) => ToolError::Unreachable(m),
                crate::device::AdapterError::Cancelled => ToolError::Cancelled,
                other => ToolError::Failed(other.to_string()),
            })?;
        Ok(json!({
            "device": output.device,
            "command": output.command,
            "output": output.output,
        }))
    }
}

struct BatchQueryTool {
    inventory: Arc<dyn Inventory>,
    adapter: Arc<dyn DeviceAdapter>,
    fanout: FanOut,
}

#[async_trait]
impl ToolHandler for BatchQueryTool {
    async fn handle(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let scope = DeviceScope::parse(str_arg(&args, "scope")?);
        let commands = commands_arg(&args, "commands")?;
        let devices = self
            .inventory
            .resolve(&scope)
            .await
            .map_err(|e| ToolError::Unreachable(e.to_string()))?;
        let adapter = self.adapter.clone();
        let cancel = ctx.cancel.clone();
        let outcomes = self
            .fanout
            .run(&devices, OpKind::Read, &ctx.cancel, None, move |device| {
                let adapter = adapter.clone();
                let commands = commands.clone();
                let cancel = cancel.clone();
                async move {
                    let mut sections = Vec::with_capacity(commands.len());
                    for command in &commands {
                        let out = adapter.run_command(&device, command, &cancel).await?;
                        sections.push(format!("$ {command}\n{}", out.output));
                    }
                    Ok(sections.join("\n"))
                }
            })
            .await
            .map_err(|e| match e {
                crate::error::OrchestratorError::EmptyScope(m) => ToolError::EmptyScope(m),
                other => ToolError::Failed(other.to_string()),
            })?;
        let map: BTreeMap<String, Outcome> = outcomes.into_iter().collect();
        serde_json::to_value(&map).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

struct SchemaSearchTool {
    knowledge: KnowledgeSources,
}

#[async_trait]
impl ToolHandler for SchemaSearchTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = str_arg(&args, "text")?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;
        let hits = self.knowledge.search_schema(text, k).await;
        serde_json::to_value(&hits).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

struct MemoryRecallTool {
    knowledge: KnowledgeSources,
}

#[async_trait]
impl ToolHandler for MemoryRecallTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = str_arg(&args, "text")?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(3) as usize;
        let hits = self.knowledge.recall_episodes(text, k).await;
        serde_json::to_value(&hits).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

struct ReportGeneratorTool {
    reports: Arc<dyn ReportStore>,
}

#[async_trait]
impl ToolHandler for ReportGeneratorTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let inspection_id = str_arg(&args, "inspection_id")?;
        let title = str_arg(&args, "title")?;
        let results: BTreeMap<String, Outcome> =
            serde_json::from_value(args.get("results").cloned().unwrap_or(Value::Null))
                .map_err(|e| ToolError::BadArguments(format!("results: {e}")))?;
        let (content, summary) = render_inspection_report(inspection_id, title, &results);
        let report = Report {
            report_id: format!("rep-{}", uuid::Uuid::new_v4().simple()),
            inspection_id: inspection_id.to_string(),
            content,
            summary: summary.clone(),
            created_at: chrono::Utc::now(),
        };
        self.reports
            .insert(report.clone())
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(json!({"report_id": report.report_id, "summary": summary}))
    }
}

const PLAN_INSTRUCTION: &str = "Draft the config change. Reply with JSON \
    {\"operation\": short_snake_case_name, \"commands\": [config lines], \
    \"risk_level\": low|medium|high}.";

struct PlanConfigTool {
    llm: Arc<dyn LlmClient>,
    inventory: Arc<dyn Inventory>,
}

#[async_trait]
impl ToolHandler for PlanConfigTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = str_arg(&args, "text")?;
        let device_name = str_arg(&args, "device")?;
        let device = self
            .inventory
            .get(device_name)
            .await
            .map_err(|e| ToolError::BadArguments(e.to_string()))?;
        let prompt = format!("Platform {}. {PLAN_INSTRUCTION}", device.platform);
        let reply = self
            .llm
            .complete(&[Message::system(prompt), Message::user(text)])
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let parsed: Value = serde_json::from_str(&reply)
            .map_err(|e| ToolError::Failed(format!("unparseable plan from model: {e}")))?;
        let operation = parsed
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("config_change");
        let commands = parsed
            .get("commands")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>())
            .unwrap_or_default();
        if commands.is_empty() {
            return Err(ToolError::Failed("plan contains no commands".into()));
        }
        let risk_level = match parsed.get("risk_level").and_then(Value::as_str) {
            Some("low") => "low",
            Some("medium") => "medium",
            _ => "high",
        };
        Ok(json!({
            "device": device.name,
            "operation": operation,
            "commands": commands,
            "risk_level": risk_level,
        }))
    }
}

struct ApplyConfigTool {
    inventory: Arc<dyn Inventory>,
    adapter: Arc<dyn DeviceAdapter>,
}

#[async_trait]
impl ToolHandler for ApplyConfigTool {
    async fn handle(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let device_name = str_arg(&args, "device")?;
        let commands = commands_arg(&args, "commands")?;
        let device = self
            .inventory
            .get(device_name)
            .await
            .map_err(|e| ToolError::BadArguments(e.to_string()))?;
        let output = self
            .adapter
            .apply_config(&device, &commands, &ctx.cancel)
            .await
            .map_err(|e| match e {
                crate::device::AdapterError::Transient(m) => ToolError::Transient(m),
                crate::device::AdapterError::Unreachable(m) => ToolError::Unreachable(m),
                crate::device::AdapterError::Cancelled => ToolError::Cancelled,
                other => ToolError::Failed(other.to_string()),
            })?;
        Ok(json!({"device": output.device, "applied": commands, "output": output.output}))
    }
}

struct VerifyConfigTool {
    inventory: Arc<dyn Inventory>,
    adapter: Arc<dyn DeviceAdapter>,
}

#[async_trait]
impl ToolHandler for VerifyConfigTool {
    async fn handle(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let device_name = str_arg(&args, "device")?;
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("show running-config");
        let device = self
            .inventory
            .get(device_name)
            .await
            .map_err(|e| ToolError::BadArguments(e.to_string()))?;
        let output = self
            .adapter
            .run_command(&device, command, &ctx.cancel)
            .await
            .map_err(|e| match e {
                crate::device::AdapterError::Transient(m) => ToolError::Transient(m),
                crate::device::AdapterError::Unreachable(m) => ToolError::Unreachable(m),
                crate::device::AdapterError::Cancelled => ToolError::Cancelled,
                other => ToolError::Failed(other.to_string()),
            })?;
        Ok(json!({"device": output.device, "command": output.command, "output": output.output}))
    }
}

struct NetboxDiffTool {
    inventory: Arc<dyn Inventory>,
}

#[async_trait]
impl ToolHandler for NetboxDiffTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let device_name = str_arg(&args, "device")?;
        let field = str_arg(&args, "field")?;
        let value = str_arg(&args, "value")?;
        let device = self
            .inventory
            .get(device_name)
            .await
            .map_err(|e| ToolError::BadArguments(e.to_string()))?;
        let current = match field {
            "address" => device.address.clone(),
            "platform" => device.platform.clone(),
            "group" => device.group.clone(),
            "role" => device.role.clone(),
            "site" => device.site.clone(),
            other => device
                .tags
                .iter()
                .find_map(|t| t.strip_prefix(&format!("{other}=")))
                .unwrap_or("")
                .to_string(),
        };
        Ok(json!({
            "device": device.name,
            "field": field,
            "from": current,
            "to": value,
            "changed": current != value,
        }))
    }
}

struct NetboxApplyTool {
    inventory: Arc<dyn Inventory>,
}

#[async_trait]
impl ToolHandler for NetboxApplyTool {
    async fn handle(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let change = InventoryChange {
            device: str_arg(&args, "device")?.to_string(),
            field: str_arg(&args, "field")?.to_string(),
            value: str_arg(&args, "value")?.to_string(),
        };
        self.inventory
            .apply(&change)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(json!({"device": change.device, "field": change.field, "value": change.value}))
    }
}
