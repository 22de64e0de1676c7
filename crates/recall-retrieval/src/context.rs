//! Per-query pipeline context.
//!
//! A `PipelineContext` is built fresh for every query and moved through the
//! stages by value. Each stage reads what earlier stages produced and writes
//! its own fields; nothing in it outlives the request.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use recall_types::{PerType, QueryRequest, ScopeRef, ScopedEntry};

use crate::types::{
    FilteredEntry, HierarchicalState, QueryIntent, RewriteStrategy, SearchQuery, SkipReason,
    SkippedStage, Stage,
};

/// Execution state for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineContext {
    /// The original request
    pub params: QueryRequest,

    /// Resolved scope chain, most specific first
    pub scope_chain: Vec<ScopeRef>,

    /// Trimmed free text, None when empty
    pub search: Option<String>,

    /// Weighted variants the search stages execute
    pub search_queries: Vec<SearchQuery>,

    pub rewrite_intent: Option<QueryIntent>,

    pub rewrite_strategy: Option<RewriteStrategy>,

    /// Lexical matches per type; None until the lexical stage applies
    pub fts_match_ids: Option<PerType<HashSet<String>>>,

    /// Fused lexical scores; None when only a scoreless backend ran
    pub fts_scores: Option<HashMap<String, f32>>,

    /// Fused semantic similarity per entry id
    pub semantic_scores: HashMap<String, f32>,

    pub hierarchical: Option<HierarchicalState>,

    /// Raw rows across the scope chain; emptied by the filter stage
    pub fetched_entries: PerType<Vec<ScopedEntry>>,

    /// Ids explicitly related to `params.related_to`
    pub related_ids: Option<PerType<HashSet<String>>>,

    pub tags_by_entry: HashMap<String, Vec<String>>,

    pub filtered: PerType<Vec<FilteredEntry>>,

    pub completed_stages: BTreeSet<Stage>,

    /// Optional stages that bailed out, with the reason. A stage turned
    /// off by config records nothing.
    pub skipped_stages: Vec<SkippedStage>,
}

impl PipelineContext {
    /// Build a fresh context for a request.
    pub fn new(params: QueryRequest) -> Self {
        let scope_chain = params.scope_chain.clone();
        let search = params.search_text().map(str::to_string);

        Self {
            params,
            scope_chain,
            search,
            search_queries: Vec::new(),
            rewrite_intent: None,
            rewrite_strategy: None,
            fts_match_ids: None,
            fts_scores: None,
            semantic_scores: HashMap::new(),
            hierarchical: None,
            fetched_entries: PerType::new(),
            related_ids: None,
            tags_by_entry: HashMap::new(),
            filtered: PerType::new(),
            completed_stages: BTreeSet::new(),
            skipped_stages: Vec::new(),
        }
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn mark_complete(&mut self, stage: Stage) {
        self.completed_stages.insert(stage);
    }

    /// Record why `stage` did not run; a later record for the same stage wins.
    pub fn record_skip(&mut self, stage: Stage, reason: SkipReason) {
        self.skipped_stages.retain(|s| s.stage != stage);
        self.skipped_stages.push(SkippedStage::new(stage, reason));
    }

    pub fn skip_reason(&self, stage: Stage) -> Option<SkipReason> {
        self.skipped_stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.reason)
    }

    /// Variants to execute, falling back to the raw search text.
    pub fn effective_queries(&self) -> Vec<SearchQuery> {
        let queries: Vec<SearchQuery> = if self.search_queries.is_empty() {
            self.search
                .iter()
                .map(|s| SearchQuery::original(s.clone()))
                .collect()
        } else {
            self.search_queries.clone()
        };

        queries
            .into_iter()
            .filter(|q| !q.text.trim().is_empty())
            .collect()
    }
}

/// Merge a score into a map, keeping the maximum per id.
///
/// This is the only way scores for the same id are combined, across query
/// variants and candidate sources alike. NaN scores are ignored.
pub fn merge_max(scores: &mut HashMap<String, f32>, id: &str, score: f32) {
    if score.is_nan() {
        return;
    }
    match scores.get_mut(id) {
        Some(existing) => {
            if score > *existing {
                *existing = score;
            }
        }
        None => {
            scores.insert(id.to_string(), score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_types::EntryType;

    fn fused(order: &[f32]) -> f32 {
        let mut scores = HashMap::new();
        for s in order {
            merge_max(&mut scores, "x", *s);
        }
        scores["x"]
    }

    #[test]
    fn test_merge_max_keeps_maximum() {
        assert_eq!(fused(&[0.8, 0.9]), 0.9);
        assert_eq!(fused(&[0.9, 0.8]), 0.9);
    }

    #[test]
    fn test_merge_max_is_order_independent() {
        let (a, b, c) = (0.3, 0.95, -0.2);
        let permutations = [
            [a, b, c],
            [a, c, b],
            [b, a, c],
            [b, c, a],
            [c, a, b],
            [c, b, a],
        ];
        for p in permutations {
            assert_eq!(fused(&p), a.max(b).max(c));
        }
    }

    #[test]
    fn test_merge_max_ignores_nan() {
        assert_eq!(fused(&[0.4, f32::NAN]), 0.4);
    }

    #[test]
    fn test_new_context_trims_search() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_search("  deploy  ");
        let ctx = PipelineContext::new(request);
        assert_eq!(ctx.search.as_deref(), Some("deploy"));
        assert_eq!(ctx.scope_chain, vec![ScopeRef::global()]);
        assert!(ctx.completed_stages.is_empty());
    }

    #[test]
    fn test_record_skip_keeps_latest_reason() {
        let mut ctx = PipelineContext::new(QueryRequest::new(vec![EntryType::Tool], vec![]));
        ctx.record_skip(Stage::Lexical, SkipReason::Precondition);
        ctx.record_skip(Stage::Semantic, SkipReason::Timeout);
        ctx.record_skip(Stage::Lexical, SkipReason::Deadline);

        assert_eq!(ctx.skipped_stages.len(), 2);
        assert_eq!(ctx.skip_reason(Stage::Lexical), Some(SkipReason::Deadline));
        assert_eq!(ctx.skip_reason(Stage::Rewrite), None);
    }

    #[test]
    fn test_effective_queries_fallback() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![]).with_search("deploy");
        let mut ctx = PipelineContext::new(request);
        assert_eq!(ctx.effective_queries(), vec![SearchQuery::original("deploy")]);

        ctx.search_queries = vec![
            SearchQuery::original("deploy"),
            SearchQuery::new("   ", 0.5, crate::types::QuerySource::Expansion),
        ];
        assert_eq!(ctx.effective_queries().len(), 1);
    }
}
