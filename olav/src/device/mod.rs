//! Device adapter seam: abstract command execution and config push.
//!
//! Transport drivers (SSH/NETCONF/gNMI) live outside the core; workflow nodes
//! and the fan-out layer see only [`DeviceAdapter`]. [`MockAdapter`] scripts
//! per-device behavior for tests, including transient faults and hangs, and
//! records every config push so tests can assert nothing ran before approval.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::inventory::Device;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Retriable: connection reset, short-lived congestion.
    #[error("transient: {0}")]
    Transient(String),
    /// Device cannot be reached at all.
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("device command failed: {0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

/// Output of one device operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub device: String,
    pub command: String,
    pub output: String,
}

/// Abstract device I/O. Implementations must observe the cancellation token in
/// long operations; the fan-out layer additionally bounds each call with the
/// per-device timeout.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Runs one read-only command.
    async fn run_command(
        &self,
        device: &Device,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AdapterError>;

    /// Pushes a config change (write path; gated upstream by approval).
    async fn apply_config(
        &self,
        device: &Device,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AdapterError>;
}

/// Scripted behavior for one device in [`MockAdapter`].
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Respond with the given output.
    Ok(String),
    /// Fail transiently `n` times, then respond with the output.
    TransientThenOk(usize, String),
    Unreachable,
    Fail(String),
    /// Sleep this long before responding (exercises the per-device timeout).
    Slow(Duration, String),
}

#[derive(Default)]
struct MockInner {
    behaviors: HashMap<String, MockBehavior>,
    transient_budget: HashMap<String, usize>,
    applied: Vec<(String, Vec<String>)>,
}

/// Test adapter with per-device scripted behavior. Devices without a script
/// respond `Ok` with a canned payload.
pub struct MockAdapter {
    inner: Mutex<MockInner>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner::default()),
        }
    }

    pub fn script(&self, device: &str, behavior: MockBehavior) {
        let mut inner = self.inner.lock().expect("mock adapter lock");
        if let MockBehavior::TransientThenOk(n, _) = &behavior {
            inner.transient_budget.insert(device.to_string(), *n);
        }
        inner.behaviors.insert(device.to_string(), behavior);
    }

    /// Config pushes recorded so far, in application order.
    pub fn applied(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().expect("mock adapter lock").applied.clone()
    }

    async fn respond(
        &self,
        device: &Device,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AdapterError> {
        let behavior = {
            let inner = self.inner.lock().expect("mock adapter lock");
            inner.behaviors.get(&device.name).cloned()
        };
        let ok = |output: String| CommandOutput {
            device: device.name.clone(),
            command: command.to_string(),
            output,
        };
        match behavior {
            None => Ok(ok(format!("{}: {} ok", device.name, command))),
            Some(MockBehavior::Ok(out)) => Ok(ok(out)),
            Some(MockBehavior::TransientThenOk(_, out)) => {
                let mut inner = self.inner.lock().expect("mock adapter lock");
                let budget = inner
                    .transient_budget
                    .get_mut(&device.name)
                    .expect("budget scripted with behavior");
                if *budget > 0 {
                    *budget -= 1;
                    Err(AdapterError::Transient("connection reset".into()))
                } else {
                    Ok(ok(out))
                }
            }
            Some(MockBehavior::Unreachable) => {
                Err(AdapterError::Unreachable(device.address.clone()))
            }
            Some(MockBehavior::Fail(msg)) => Err(AdapterError::Failed(msg)),
            Some(MockBehavior::Slow(delay, out)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(ok(out)),
                }
            }
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceAdapter for MockAdapter {
    async fn run_command(
        &self,
        device: &Device,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AdapterError> {
        self.respond(device, command, cancel).await
    }

    async fn apply_config(
        &self,
        device: &Device,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, AdapterError> {
        let result = self.respond(device, "configure", cancel).await?;
        let mut inner = self.inner.lock().expect("mock adapter lock");
        inner
            .applied
            .push((device.name.clone(), commands.to_vec()));
        Ok(result)
    }
}
