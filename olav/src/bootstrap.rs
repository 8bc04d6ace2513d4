//! Process wiring: settings + collaborator seams → one orchestrator handle.
//!
//! No process-wide mutable globals: the server carries an [`Orchestrator`] and
//! passes it (or its parts) into each request path. Store backends follow
//! `Settings::db_path` — empty means in-memory, otherwise SQLite files under
//! that directory.

use std::sync::Arc;
use std::time::Duration;

use env_config::Settings;

use crate::checkpoint::{Checkpointer, MemorySaver, SqliteSaver};
use crate::device::{DeviceAdapter, MockAdapter};
use crate::dispatch::{Dispatcher, MemoryThreadStore, SqliteThreadStore, ThreadStore};
use crate::error::OrchestratorError;
use crate::fanout::{FanOut, FanOutConfig};
use crate::inventory::{device, Inventory, StaticInventory};
use crate::jobs::{JobManager, JobStore, MemoryJobStore, SqliteJobStore};
use crate::knowledge::{KnowledgeSources, StaticRetriever};
use crate::llm::{LlmClient, MockLlm};
use crate::report::{MemoryReportStore, ReportStore, SqliteReportStore};
use crate::session::{MemorySessionStore, SessionManager, SessionStore, SqliteSessionStore};
use crate::state::WorkflowState;
use crate::tools::catalogue::{register_catalogue, CatalogueDeps};
use crate::tools::ToolRegistry;
use crate::workflows::context::{WorkflowContext, WorkflowLimits};
use crate::workflows::inspection::InspectionProfile;
use crate::inventory::DeviceScope;

/// External collaborator seams injected at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub adapter: Arc<dyn DeviceAdapter>,
    pub inventory: Arc<dyn Inventory>,
    pub knowledge: KnowledgeSources,
    pub profiles: Vec<InspectionProfile>,
}

impl Collaborators {
    /// Self-contained in-process collaborators: scripted LLM, mock device
    /// adapter, a small seed inventory, and one stock inspection profile.
    /// Serves development and tests; real deployments inject their own seams.
    pub fn loopback() -> Self {
        Self {
            llm: Arc::new(MockLlm::new(
                r#"{"intent": "quick_query", "confidence": 0.8}"#,
            )),
            adapter: Arc::new(MockAdapter::new()),
            inventory: Arc::new(StaticInventory::new(vec![
                device("R1", "core", "router", "fra"),
                device("R2", "core", "router", "ams"),
                device("SW1", "access", "switch", "fra"),
            ])),
            knowledge: KnowledgeSources {
                episodic: None,
                schema: Some(Arc::new(StaticRetriever::new(
                    "schema",
                    vec![
                        ("bgp_neighbors: BGP peer state per device".into(), "table:bgp_neighbors".into()),
                        ("interfaces: operational status per port".into(), "table:interfaces".into()),
                    ],
                ))),
                documents: None,
            },
            profiles: vec![InspectionProfile {
                id: "bgp_peer_audit".into(),
                name: "BGP peer audit".into(),
                scope: DeviceScope::Group("core".into()),
                command: "show ip bgp summary".into(),
                expect_contains: None,
            }],
        }
    }
}

/// Everything a request path needs, built once at startup.
pub struct Orchestrator {
    pub settings: Settings,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<JobManager>,
    pub reports: Arc<dyn ReportStore>,
}

impl Orchestrator {
    /// Wires stores, registry, workflows, and the worker pool. Returns the
    /// orchestrator and, when no master token was configured, the generated one
    /// for the caller to log exactly once.
    pub fn build(
        settings: Settings,
        collab: Collaborators,
    ) -> Result<(Self, Option<String>), OrchestratorError> {
        let persistent = !settings.db_path.is_empty();
        let (session_store, checkpointer, thread_store, job_store, reports): (
            Arc<dyn SessionStore>,
            Arc<dyn Checkpointer<WorkflowState>>,
            Arc<dyn ThreadStore>,
            Arc<dyn JobStore>,
            Arc<dyn ReportStore>,
        ) = if persistent {
            let dir = std::path::Path::new(&settings.db_path);
            std::fs::create_dir_all(dir)
                .map_err(|e| OrchestratorError::Internal(format!("create {dir:?}: {e}")))?;
            (
                Arc::new(
                    SqliteSessionStore::new(dir.join("sessions.db"))
                        .map_err(OrchestratorError::from)?,
                ),
                Arc::new(
                    SqliteSaver::new(dir.join("checkpoints.db"))
                        .map_err(|e| OrchestratorError::Internal(e.to_string()))?,
                ),
                Arc::new(
                    SqliteThreadStore::new(dir.join("threads.db"))
                        .map_err(OrchestratorError::from)?,
                ),
                Arc::new(
                    SqliteJobStore::new(dir.join("jobs.db")).map_err(OrchestratorError::from)?,
                ),
                Arc::new(
                    SqliteReportStore::new(dir.join("reports.db"))
                        .map_err(|e| OrchestratorError::Internal(e.to_string()))?,
                ),
            )
        } else {
            (
                Arc::new(MemorySessionStore::new()),
                Arc::new(MemorySaver::new()),
                Arc::new(MemoryThreadStore::new()),
                Arc::new(MemoryJobStore::new()),
                Arc::new(MemoryReportStore::new()),
            )
        };

        let fanout = FanOut::new(FanOutConfig {
            max_concurrency: settings.fan_out_max_concurrency,
            device_timeout: Duration::from_secs(settings.device_timeout_seconds),
        });
        let mut registry = ToolRegistry::new(Duration::from_secs(settings.tool_timeout_seconds));
        register_catalogue(
            &mut registry,
            &CatalogueDeps {
                llm: collab.llm.clone(),
                inventory: collab.inventory.clone(),
                adapter: collab.adapter.clone(),
                knowledge: collab.knowledge.clone(),
                reports: reports.clone(),
                fanout: fanout.clone(),
            },
        )
        .map_err(OrchestratorError::from)?;

        let ctx = Arc::new(WorkflowContext {
            registry: Arc::new(registry),
            llm: collab.llm,
            inventory: collab.inventory,
            adapter: collab.adapter,
            knowledge: collab.knowledge,
            fanout,
            limits: WorkflowLimits {
                deepdive_max_depth: settings.deepdive_max_depth,
                deepdive_max_fanout: settings.deepdive_max_fanout,
            },
        });

        let (sessions, generated_master) = SessionManager::bootstrap(
            session_store,
            settings.master_token.clone(),
            settings.session_ttl_hours,
        );

        let dispatcher = Dispatcher::new(
            ctx.clone(),
            thread_store,
            checkpointer.clone(),
            crate::dispatch::DEFAULT_CONFIDENCE_FLOOR,
            settings.guard_mode_enabled,
        )
        .map_err(|e| OrchestratorError::Internal(format!("workflow graphs: {e}")))?;

        let jobs = JobManager::start(
            ctx,
            checkpointer,
            job_store,
            collab.profiles,
            settings.job_workers,
        );

        Ok((
            Self {
                settings,
                sessions: Arc::new(sessions),
                dispatcher: Arc::new(dispatcher),
                jobs: Arc::new(jobs),
                reports,
            },
            generated_master,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: In-memory build wires a working orchestrator and generates a
    /// master token when none is configured.
    #[tokio::test]
    async fn build_in_memory_generates_master() {
        let settings = Settings::default();
        let (orchestrator, generated) =
            Orchestrator::build(settings, Collaborators::loopback()).unwrap();
        let master = generated.expect("no MASTER_TOKEN configured, one is generated");
        assert!(orchestrator.sessions.is_master(&master));
    }

    /// **Scenario**: A persistent build creates its SQLite files under db_path.
    #[tokio::test]
    async fn build_persistent_creates_databases() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.db_path = dir.path().join("olav").to_string_lossy().into_owned();
        settings.master_token = Some("master-token".into());
        let (orchestrator, generated) =
            Orchestrator::build(settings, Collaborators::loopback()).unwrap();
        assert!(generated.is_none());
        assert!(orchestrator.sessions.is_master("master-token"));
        for file in ["sessions.db", "checkpoints.db", "threads.db", "jobs.db", "reports.db"] {
            assert!(dir.path().join("olav").join(file).exists(), "{file} missing");
        }
    }
}
