//! Inspection reports: rendering and persistence.
//!
//! A report is the read-only artifact of an inspection job: rendered markdown
//! plus a one-line summary. Created once by the inspection workflow, retrievable
//! by id any number of times.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fanout::Outcome;

/// Persisted output of an inspection. Read-only after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: String,
    pub inspection_id: String,
    /// Rendered markdown.
    pub content: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report not found: {0}")]
    NotFound(String),
    #[error("report storage: {0}")]
    Storage(String),
}

/// Report persistence seam.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert(&self, report: Report) -> Result<(), ReportError>;

    async fn get(&self, report_id: &str) -> Result<Report, ReportError>;
}

/// Renders the markdown body and summary for an inspection run.
///
/// The body always contains the device list and a per-device pass/fail line;
/// devices that never answered are marked unreachable.
pub fn render_inspection_report(
    inspection_id: &str,
    title: &str,
    outcomes: &BTreeMap<String, Outcome>,
) -> (String, String) {
    let total = outcomes.len();
    let passed = outcomes.values().filter(|o| o.is_ok()).count();

    let mut content = String::new();
    content.push_str(&format!("# Inspection report: {title}\n\n"));
    content.push_str(&format!("Inspection: `{inspection_id}`  \n"));
    content.push_str(&format!("Devices: {total}, passed: {passed}, failed: {}\n\n", total - passed));
    content.push_str("| Device | Result | Detail |\n|---|---|---|\n");
    for (device, outcome) in outcomes {
        let (result, detail) = match outcome {
            Outcome::Ok { output } => ("pass", output.clone()),
            Outcome::Error { message } => ("fail", message.clone()),
            Outcome::Timeout => ("fail", "timed out".to_string()),
            Outcome::SkippedUnreachable => ("fail", "unreachable".to_string()),
            Outcome::Rejected => ("fail", "rejected".to_string()),
        };
        let detail = detail.replace('\n', " ");
        content.push_str(&format!("| {device} | {result} | {detail} |\n"));
    }

    let summary = format!("{passed}/{total} devices passed {title}");
    (content, summary)
}

/// In-memory report store.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: DashMap<String, Report>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn insert(&self, report: Report) -> Result<(), ReportError> {
        self.reports.insert(report.report_id.clone(), report);
        Ok(())
    }

    async fn get(&self, report_id: &str) -> Result<Report, ReportError> {
        self.reports
            .get(report_id)
            .map(|r| r.clone())
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))
    }
}

/// SQLite-backed report store; one row per report, content inline. Uses
/// `spawn_blocking` for all disk work so the executor never blocks on I/O.
pub struct SqliteReportStore {
    db_path: std::path::PathBuf,
}

impl SqliteReportStore {
    pub fn new(path: impl AsRef<std::path::Path>) -> Result<Self, ReportError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| ReportError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                report_id TEXT PRIMARY KEY,
                inspection_id TEXT NOT NULL,
                content TEXT NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| ReportError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    /// Runs one blocking sqlite operation off the executor.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, ReportError>
    where
        T: Send + 'static,
        F: FnOnce(rusqlite::Connection) -> Result<T, ReportError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReportError::Storage(e.to_string()))?;
            op(conn)
        })
        .await
        .map_err(|e| ReportError::Storage(format!("join: {e}")))?
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn insert(&self, report: Report) -> Result<(), ReportError> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO reports
                    (report_id, inspection_id, content, summary, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    report.report_id,
                    report.inspection_id,
                    report.content,
                    report.summary,
                    report.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ReportError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, report_id: &str) -> Result<Report, ReportError> {
        let report_id = report_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT report_id, inspection_id, content, summary, created_at FROM reports WHERE report_id = ?1",
                params![report_id],
                |row| {
                    Ok(Report {
                        report_id: row.get(0)?,
                        inspection_id: row.get(1)?,
                        content: row.get(2)?,
                        summary: row.get(3)?,
                        created_at: row
                            .get::<_, String>(4)?
                            .parse::<DateTime<Utc>>()
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()
            .map_err(|e| ReportError::Storage(e.to_string()))?
            .ok_or_else(|| ReportError::NotFound(report_id))
        })
        .await
    }
}
