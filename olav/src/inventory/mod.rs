//! Device inventory: the source of truth the fan-out layer resolves scopes against.
//!
//! A [`DeviceScope`] is either an explicit name list or a `group:`/`role:`/`site:`
//! filter; resolution always yields a finite set. The store itself is an external
//! collaborator behind [`Inventory`]; [`StaticInventory`] is the in-process
//! implementation used for tests and self-contained deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// One network device; `platform` is the dispatch key for drivers and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub address: String,
    pub platform: String,
    pub group: String,
    pub role: String,
    pub site: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Expression resolving to a finite device set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeviceScope {
    /// Explicit device names.
    Names(Vec<String>),
    Group(String),
    Role(String),
    Site(String),
}

impl DeviceScope {
    /// Parses a scope expression: `group:<g>`, `role:<r>`, `site:<s>`, or a
    /// comma-separated name list.
    pub fn parse(expr: &str) -> Self {
        if let Some(g) = expr.strip_prefix("group:") {
            DeviceScope::Group(g.trim().to_string())
        } else if let Some(r) = expr.strip_prefix("role:") {
            DeviceScope::Role(r.trim().to_string())
        } else if let Some(s) = expr.strip_prefix("site:") {
            DeviceScope::Site(s.trim().to_string())
        } else {
            DeviceScope::Names(
                expr.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
    }
}

impl std::fmt::Display for DeviceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceScope::Names(names) => write!(f, "{}", names.join(",")),
            DeviceScope::Group(g) => write!(f, "group:{g}"),
            DeviceScope::Role(r) => write!(f, "role:{r}"),
            DeviceScope::Site(s) => write!(f, "site:{s}"),
        }
    }
}

/// One intended inventory mutation, produced by the NetBox diff step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryChange {
    pub device: String,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("inventory unreachable: {0}")]
    Unreachable(String),
}

/// Inventory seam: scope resolution plus the narrow mutation surface the
/// NetBox workflow applies through.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Resolves a scope to devices. May be empty; callers that require a
    /// non-empty set raise `EmptyScope`.
    async fn resolve(&self, scope: &DeviceScope) -> Result<Vec<Device>, InventoryError>;

    async fn get(&self, name: &str) -> Result<Device, InventoryError>;

    /// Applies one approved inventory change.
    async fn apply(&self, change: &InventoryChange) -> Result<(), InventoryError>;
}

/// In-process inventory over a fixed device table.
pub struct StaticInventory {
    devices: RwLock<HashMap<String, Device>>,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().map(|d| (d.name.clone(), d)).collect()),
        }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn resolve(&self, scope: &DeviceScope) -> Result<Vec<Device>, InventoryError> {
        let devices = self.devices.read().await;
        let mut matched: Vec<Device> = match scope {
            DeviceScope::Names(names) => names
                .iter()
                .filter_map(|n| devices.get(n).cloned())
                .collect(),
            DeviceScope::Group(g) => devices.values().filter(|d| &d.group == g).cloned().collect(),
            DeviceScope::Role(r) => devices.values().filter(|d| &d.role == r).cloned().collect(),
            DeviceScope::Site(s) => devices.values().filter(|d| &d.site == s).cloned().collect(),
        };
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    async fn get(&self, name: &str) -> Result<Device, InventoryError> {
        self.devices
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(name.to_string()))
    }

    async fn apply(&self, change: &InventoryChange) -> Result<(), InventoryError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(&change.device)
            .ok_or_else(|| InventoryError::NotFound(change.device.clone()))?;
        match change.field.as_str() {
            "address" => device.address = change.value.clone(),
            "platform" => device.platform = change.value.clone(),
            "group" => device.group = change.value.clone(),
            "role" => device.role = change.value.clone(),
            "site" => device.site = change.value.clone(),
            other => {
                device.tags.retain(|t| !t.starts_with(&format!("{other}=")));
                device.tags.push(format!("{other}={}", change.value));
            }
        }
        Ok(())
    }
}

/// Convenience device constructor for tests and seed inventories.
pub fn device(name: &str, group: &str, role: &str, site: &str) -> Device {
    Device {
        name: name.to_string(),
        address: format!("{name}.lab.invalid"),
        platform: "cisco_iosxe".to_string(),
        group: group.to_string(),
        role: role.to_string(),
        site: site.to_string(),
        tags: vec![],
    }
}
