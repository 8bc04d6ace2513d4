//! Device execution fan-out: bounded concurrency, per-device timeouts, partial
//! success as the normal case.
//!
//! Given a resolved device set and a per-device async operation, runs up to
//! `max_concurrency` operations at once (excess queue FIFO on the semaphore),
//! times each against the per-device timeout, and aggregates one [`Outcome`]
//! per device. The batch never aborts because some devices failed. The returned
//! map has no ordering contract; callers needing determinism sort by name.
//!
//! Read operations retry once on a transient fault with a fresh attempt; a
//! second transient is recorded as unreachable. Write operations are never
//! retried — the operator must approve again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::device::AdapterError;
use crate::error::OrchestratorError;
use crate::inventory::Device;
use crate::state::Progress;

/// Bounds for one fan-out batch.
#[derive(Debug, Clone, Copy)]
pub struct FanOutConfig {
    pub max_concurrency: usize,
    pub device_timeout: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            device_timeout: Duration::from_secs(30),
        }
    }
}

/// Whether the per-device operation reads or mutates; controls the retry rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

/// Result of one device's operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok { output: String },
    Error { message: String },
    Timeout,
    SkippedUnreachable,
    /// Batch was rejected at the approval gate; no side effect happened.
    Rejected,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }
}

/// Aggregated fan-out result: device name → outcome.
pub type OutcomeMap = HashMap<String, Outcome>;

/// Progress callback invoked after each device completes.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Marks every device of a rejected batch without touching any of them.
pub fn rejected_outcomes(devices: &[Device]) -> OutcomeMap {
    devices
        .iter()
        .map(|d| (d.name.clone(), Outcome::Rejected))
        .collect()
}

/// Fan-out executor. Stateless besides its bounds; cheap to clone.
#[derive(Debug, Clone)]
pub struct FanOut {
    config: FanOutConfig,
}

impl FanOut {
    pub fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    /// Runs `op` once per device under the concurrency and timeout bounds.
    ///
    /// Fails with `EmptyScope` for an empty device set instead of silently
    /// succeeding. Cancellation is cooperative: devices not yet started when the
    /// token fires are recorded as errors, in-flight ones are raced against it.
    pub async fn run<F, Fut>(
        &self,
        devices: &[Device],
        kind: OpKind,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
        op: F,
    ) -> Result<OutcomeMap, OrchestratorError>
    where
        F: Fn(Device) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, AdapterError>> + Send,
    {
        if devices.is_empty() {
            return Err(OrchestratorError::EmptyScope(
                "device scope resolved to zero devices".into(),
            ));
        }
        let total = devices.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(total);

        for device in devices.iter().cloned() {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let op = op.clone();
            let progress = progress.clone();
            let completed = completed.clone();
            let timeout = self.config.device_timeout;
            handles.push(tokio::spawn(async move {
                let name = device.name.clone();
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = if cancel.is_cancelled() {
                    Outcome::Error {
                        message: "cancelled before start".into(),
                    }
                } else {
                    run_one(&device, kind, timeout, &cancel, op).await
                };
                let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if let Some(publish) = progress {
                    publish(Progress {
                        completed: done,
                        total,
                    });
                }
                (name, outcome)
            }));
        }

        let mut outcomes = OutcomeMap::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok((name, outcome)) => {
                    outcomes.insert(name, outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "fan-out task panicked");
                }
            }
        }
        Ok(outcomes)
    }
}

async fn run_one<F, Fut>(
    device: &Device,
    kind: OpKind,
    timeout: Duration,
    cancel: &CancellationToken,
    op: F,
) -> Outcome
where
    F: Fn(Device) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, AdapterError>> + Send,
{
    let mut result = attempt(device, timeout, cancel, &op).await;
    if kind == OpKind::Read && matches!(result, Attempt::Done(Err(AdapterError::Transient(_)))) {
        tracing::debug!(device = %device.name, "transient read failure, retrying with fresh attempt");
        result = match attempt(device, timeout, cancel, &op).await {
            Attempt::Done(Err(AdapterError::Transient(m))) => {
                Attempt::Done(Err(AdapterError::Unreachable(m)))
            }
            other => other,
        };
    }
    match result {
        Attempt::TimedOut => Outcome::Timeout,
        Attempt::Done(Ok(output)) => Outcome::Ok { output },
        Attempt::Done(Err(AdapterError::Unreachable(_))) => Outcome::SkippedUnreachable,
        Attempt::Done(Err(AdapterError::Transient(m)))
        | Attempt::Done(Err(AdapterError::Failed(m))) => Outcome::Error { message: m },
        Attempt::Done(Err(AdapterError::Cancelled)) => Outcome::Error {
            message: "cancelled".into(),
        },
    }
}

/// Result of one timed attempt; the hard per-device timeout is its own case and
/// is never retried.
enum Attempt {
    Done(Result<String, AdapterError>),
    TimedOut,
}

async fn attempt<F, Fut>(
    device: &Device,
    timeout: Duration,
    cancel: &CancellationToken,
    op: &F,
) -> Attempt
where
    F: Fn(Device) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, AdapterError>> + Send,
{
    tokio::select! {
        _ = cancel.cancelled() => Attempt::Done(Err(AdapterError::Cancelled)),
        timed = tokio::time::timeout(timeout, op(device.clone())) => match timed {
            Ok(result) => Attempt::Done(result),
            Err(_) => Attempt::TimedOut,
        },
    }
}
