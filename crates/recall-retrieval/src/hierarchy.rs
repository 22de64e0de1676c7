//! In-memory summary hierarchy.
//!
//! A [`SummaryHierarchy`] holds one tree per scope. Leaves are entries with
//! an embedding; summary nodes carry an embedding of their own and point at
//! children (lower-level summaries or leaves). Retrieval embeds the query,
//! starts at the coarsest level and walks down, only examining children of
//! the nodes selected at the level above. The beam starts at the expansion
//! factor and widens by that factor per level, capped at `max_results`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use recall_types::{EntryType, ScopeRef, ScopeType};

use crate::collaborators::{
    Embedder, HierarchicalRequest, HierarchicalResult, HierarchicalRetriever, RetrievalStep,
};
use crate::error::CollaboratorError;
use crate::types::ScoredEntryRef;

/// A summary node. Level 1 summarizes leaves; higher levels summarize
/// the level below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryNode {
    pub id: String,
    pub level: u8,
    pub embedding: Vec<f32>,

    /// Ids of child summaries or leaves
    pub children: Vec<String>,
}

/// An entry at the bottom of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub id: String,
    pub entry_type: EntryType,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
struct SummaryTree {
    summaries: HashMap<String, SummaryNode>,
    leaves: HashMap<String, LeafEntry>,
}

impl SummaryTree {
    fn top_level(&self) -> Option<u8> {
        self.summaries.values().map(|n| n.level).max()
    }

    fn traverse(&self, query: &[f32], request: &HierarchicalRequest) -> HierarchicalResult {
        let start = Instant::now();
        let mut steps = Vec::new();

        let Some(top) = self.top_level() else {
            return HierarchicalResult::default();
        };

        let expansion = request.expansion_factor.max(1);
        let max_results = request.max_results.max(1);
        let mut beam = expansion.min(max_results);

        let mut frontier: Vec<&SummaryNode> =
            self.summaries.values().filter(|n| n.level == top).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut leaf_pool: Vec<&LeafEntry> = Vec::new();

        while !frontier.is_empty() {
            let step_start = Instant::now();
            let level = frontier.iter().map(|n| n.level).max().unwrap_or(0);
            let searched = frontier.len();

            let mut scored: Vec<(f32, &SummaryNode)> = frontier
                .iter()
                .map(|n| (cosine_similarity(query, &n.embedding), *n))
                .filter(|(s, _)| *s >= request.min_similarity)
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            scored.truncate(beam);

            steps.push(RetrievalStep {
                level,
                summaries_searched: searched,
                summaries_matched: scored.len(),
                time_ms: step_start.elapsed().as_millis() as u64,
            });

            let mut next = Vec::new();
            for (_, node) in &scored {
                for child in &node.children {
                    if !seen.insert(child.as_str()) {
                        continue;
                    }
                    if let Some(summary) = self.summaries.get(child) {
                        next.push(summary);
                    } else if let Some(leaf) = self.leaves.get(child) {
                        leaf_pool.push(leaf);
                    }
                }
            }

            frontier = next;
            beam = beam.saturating_mul(expansion).min(max_results);
        }

        let mut entries: Vec<ScoredEntryRef> = leaf_pool
            .into_iter()
            .map(|leaf| {
                ScoredEntryRef::new(
                    leaf.id.clone(),
                    leaf.entry_type,
                    cosine_similarity(query, &leaf.embedding),
                )
            })
            .filter(|e| e.score >= request.min_similarity)
            .collect();
        entries.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        entries.truncate(max_results);

        HierarchicalResult {
            entries,
            steps,
            total_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Summary trees per scope, searched with an [`Embedder`].
pub struct SummaryHierarchy {
    embedder: Arc<dyn Embedder>,
    trees: RwLock<HashMap<ScopeRef, SummaryTree>>,
}

impl SummaryHierarchy {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            trees: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a summary node.
    pub fn add_summary(&self, scope: &ScopeRef, node: SummaryNode) -> Result<(), CollaboratorError> {
        let mut trees = self.trees.write().map_err(lock_error)?;
        let tree = trees.entry(scope.clone()).or_default();
        tree.summaries.insert(node.id.clone(), node);
        Ok(())
    }

    /// Insert or replace a leaf entry.
    pub fn add_leaf(&self, scope: &ScopeRef, leaf: LeafEntry) -> Result<(), CollaboratorError> {
        let mut trees = self.trees.write().map_err(lock_error)?;
        let tree = trees.entry(scope.clone()).or_default();
        tree.leaves.insert(leaf.id.clone(), leaf);
        Ok(())
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> CollaboratorError {
    CollaboratorError::Backend(format!("Summary tree lock error: {}", e))
}

#[async_trait]
impl HierarchicalRetriever for SummaryHierarchy {
    async fn has_summaries(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
    ) -> Result<bool, CollaboratorError> {
        let scope = ScopeRef {
            scope_type,
            scope_id: scope_id.map(str::to_string),
        };
        let trees = self.trees.read().map_err(lock_error)?;
        Ok(trees
            .get(&scope)
            .is_some_and(|tree| !tree.summaries.is_empty()))
    }

    async fn retrieve(
        &self,
        request: &HierarchicalRequest,
    ) -> Result<HierarchicalResult, CollaboratorError> {
        let query = self.embedder.embed(&request.query).await?;

        let scope = ScopeRef {
            scope_type: request.scope_type,
            scope_id: request.scope_id.clone(),
        };
        let trees = self.trees.read().map_err(lock_error)?;
        let result = match trees.get(&scope) {
            Some(tree) => tree.traverse(&query, request),
            None => HierarchicalResult::default(),
        };

        debug!(
            scope = %scope,
            levels = result.steps.len(),
            entries = result.entries.len(),
            "Summary hierarchy traversed"
        );
        Ok(result)
    }
}

/// Cosine similarity in [-1.0, 1.0]; 0.0 for zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mock::MockEmbedder;

    fn scope() -> ScopeRef {
        ScopeRef::new(ScopeType::Project, "p1")
    }

    fn node(id: &str, level: u8, embedding: [f32; 2], children: &[&str]) -> SummaryNode {
        SummaryNode {
            id: id.to_string(),
            level,
            embedding: embedding.to_vec(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn leaf(id: &str, embedding: [f32; 2]) -> LeafEntry {
        LeafEntry {
            id: id.to_string(),
            entry_type: EntryType::Knowledge,
            embedding: embedding.to_vec(),
        }
    }

    /// Two top-level topics (x and y axis), each with two level-1
    /// summaries over two leaves.
    fn hierarchy() -> SummaryHierarchy {
        let embedder = MockEmbedder::default()
            .with_vector("databases", vec![1.0, 0.0])
            .with_vector("frontend", vec![0.0, 1.0]);
        let h = SummaryHierarchy::new(Arc::new(embedder));
        let s = scope();

        h.add_summary(&s, node("top-db", 2, [1.0, 0.0], &["db-a", "db-b"])).unwrap();
        h.add_summary(&s, node("top-ui", 2, [0.0, 1.0], &["ui-a"])).unwrap();
        h.add_summary(&s, node("db-a", 1, [0.95, 0.1], &["pg", "mysql"])).unwrap();
        h.add_summary(&s, node("db-b", 1, [0.8, 0.3], &["redis"])).unwrap();
        h.add_summary(&s, node("ui-a", 1, [0.1, 0.95], &["react"])).unwrap();
        h.add_leaf(&s, leaf("pg", [0.99, 0.05])).unwrap();
        h.add_leaf(&s, leaf("mysql", [0.9, 0.2])).unwrap();
        h.add_leaf(&s, leaf("redis", [0.6, 0.6])).unwrap();
        h.add_leaf(&s, leaf("react", [0.05, 0.99])).unwrap();
        h
    }

    fn request(query: &str, min_similarity: f32) -> HierarchicalRequest {
        HierarchicalRequest {
            query: query.to_string(),
            scope_type: ScopeType::Project,
            scope_id: Some("p1".to_string()),
            max_results: 10,
            expansion_factor: 1,
            min_similarity,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_has_summaries() {
        let h = hierarchy();
        assert!(h.has_summaries(ScopeType::Project, Some("p1")).await.unwrap());
        assert!(!h.has_summaries(ScopeType::Project, Some("p2")).await.unwrap());
        assert!(!h.has_summaries(ScopeType::Global, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_traversal_only_descends_selected_branches() {
        let h = hierarchy();
        let result = h.retrieve(&request("databases", 0.5)).await.unwrap();

        let ids: Vec<&str> = result.entries.iter().map(|e| e.id.as_str()).collect();
        // Beam of 1 at each level: top-db, then db-a, then its leaves
        assert_eq!(ids, vec!["pg", "mysql"]);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].level, 2);
        assert_eq!(result.steps[0].summaries_searched, 2);
        assert_eq!(result.steps[0].summaries_matched, 1);
        assert_eq!(result.steps[1].summaries_searched, 2);
        assert_eq!(result.steps[1].summaries_matched, 1);
    }

    #[tokio::test]
    async fn test_wider_beam_reaches_more_leaves() {
        let h = hierarchy();
        let mut req = request("databases", 0.5);
        req.expansion_factor = 2;

        let result = h.retrieve(&req).await.unwrap();
        let ids: Vec<&str> = result.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["pg", "mysql", "redis"]);
    }

    #[tokio::test]
    async fn test_min_similarity_prunes_everything() {
        let h = hierarchy();
        let result = h.retrieve(&request("databases", 0.999_9)).await.unwrap();
        assert!(result.entries.is_empty());
        // top-db matches exactly; nothing below it clears the bar
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].summaries_matched, 0);
    }

    #[tokio::test]
    async fn test_max_results_caps_leaves() {
        let h = hierarchy();
        let mut req = request("databases", 0.0);
        req.expansion_factor = 5;
        req.max_results = 2;

        let result = h.retrieve(&req).await.unwrap();
        assert_eq!(result.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_embedder_failure_propagates() {
        let h = hierarchy();
        let result = h.retrieve(&request("unknown text", 0.5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_scope_returns_empty() {
        let h = hierarchy();
        let mut req = request("databases", 0.5);
        req.scope_id = Some("other".to_string());
        let result = h.retrieve(&req).await.unwrap();
        assert!(result.entries.is_empty());
        assert!(result.steps.is_empty());
    }
}
