//! Knowledge lookup: read-only retrieval sources consulted by workflow nodes.
//!
//! Three sources: episodic memory (past successful traces), the schema index
//! (device data tables/fields), and the document index (manuals, notes). All are
//! advisory: a source that fails or is absent logs a warning and the node
//! proceeds without retrieval, never aborting the workflow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// One retrieved snippet with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    /// Where this came from (trace id, table name, document path).
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("index unreachable: {0}")]
    Unreachable(String),
    #[error("retrieval failed: {0}")]
    Failed(String),
}

/// Retrieval seam: `search(query, k)` returns the top-k snippets, best first.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, RetrievalError>;
}

/// The three sources a node may consult. Any of them may be absent.
#[derive(Clone, Default)]
pub struct KnowledgeSources {
    pub episodic: Option<Arc<dyn Retriever>>,
    pub schema: Option<Arc<dyn Retriever>>,
    pub documents: Option<Arc<dyn Retriever>>,
}

impl KnowledgeSources {
    /// Searches one optional source, degrading to empty on absence or failure.
    async fn search_degrading(
        source: &Option<Arc<dyn Retriever>>,
        query: &str,
        k: usize,
    ) -> Vec<Snippet> {
        let Some(retriever) = source else {
            return Vec::new();
        };
        match retriever.search(query, k).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!(source = retriever.name(), error = %e, "retrieval failed, proceeding without");
                Vec::new()
            }
        }
    }

    pub async fn recall_episodes(&self, query: &str, k: usize) -> Vec<Snippet> {
        Self::search_degrading(&self.episodic, query, k).await
    }

    pub async fn search_schema(&self, query: &str, k: usize) -> Vec<Snippet> {
        Self::search_degrading(&self.schema, query, k).await
    }

    pub async fn search_documents(&self, query: &str, k: usize) -> Vec<Snippet> {
        Self::search_degrading(&self.documents, query, k).await
    }
}

/// In-process retriever over fixed entries; scores by naive term overlap.
/// Serves tests and seed deployments without a vector index.
pub struct StaticRetriever {
    name: String,
    entries: Vec<Snippet>,
}

impl StaticRetriever {
    pub fn new(name: impl Into<String>, entries: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            entries: entries
                .into_iter()
                .map(|(content, source)| Snippet {
                    content,
                    source,
                    score: 0.0,
                })
                .collect(),
        }
    }
}

fn overlap_score(query: &str, content: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms
        .iter()
        .filter(|t| content_lower.contains(&t.to_lowercase()))
        .count();
    hits as f32 / terms.len() as f32
}

#[async_trait]
impl Retriever for StaticRetriever {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        let mut scored: Vec<Snippet> = self
            .entries
            .iter()
            .map(|e| Snippet {
                score: overlap_score(query, &e.content),
                ..e.clone()
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Retriever that always fails; used to exercise the degradation path.
pub struct FailingRetriever;

#[async_trait]
impl Retriever for FailingRetriever {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Snippet>, RetrievalError> {
        Err(RetrievalError::Unreachable("index down".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_index() -> StaticRetriever {
        StaticRetriever::new(
            "schema",
            vec![
                ("bgp_neighbors: peer state table".into(), "table:bgp_neighbors".into()),
                ("interfaces: oper status per port".into(), "table:interfaces".into()),
                ("ospf_areas: area membership".into(), "table:ospf_areas".into()),
            ],
        )
    }

    /// **Scenario**: Ranked results match the query terms, best first, capped at k.
    #[tokio::test]
    async fn search_ranks_and_caps() {
        let idx = schema_index();
        let hits = idx.search("bgp peer state", 2).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "table:bgp_neighbors");
        assert!(hits.len() <= 2);
        let none = idx.search("qos policers", 5).await.unwrap();
        assert!(none.is_empty());
    }

    /// **Scenario**: A failing source degrades to empty results instead of erroring.
    #[tokio::test]
    async fn failing_source_degrades() {
        let sources = KnowledgeSources {
            episodic: Some(Arc::new(FailingRetriever)),
            schema: Some(Arc::new(schema_index())),
            documents: None,
        };
        assert!(sources.recall_episodes("anything", 3).await.is_empty());
        assert!(!sources.search_schema("bgp", 3).await.is_empty());
        assert!(sources.search_documents("bgp", 3).await.is_empty());
    }
}
