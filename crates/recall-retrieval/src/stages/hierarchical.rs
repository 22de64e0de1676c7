//! Hierarchical stage: narrow candidates through a summary hierarchy.
//!
//! For semantic and hybrid searches over a scope that has summaries, the
//! hierarchy is traversed coarse-to-fine and the leaf entries it selects
//! become the candidate set. After fetch, [`filter_by_hierarchical_candidates`]
//! restricts fetched rows to those candidates and folds their similarities
//! into the semantic scores.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use recall_types::PipelineConfig;

use crate::collaborators::{Capabilities, HierarchicalRequest};
use crate::context::{merge_max, PipelineContext};
use crate::stages::{call_with_timeout, degrade, skip_unmet};
use crate::types::{HierarchicalState, Stage};

/// Run the summary traversal for the most specific scope in the chain.
///
/// Leaves the context untouched when disabled. Records a skip when there
/// is no search text, when the strategy is not semantic (and the config
/// asks for that), when the chain is empty, when no retriever is attached,
/// when the scope has no summaries, or when the retriever fails.
pub async fn hierarchical_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
    config: &PipelineConfig,
) -> PipelineContext {
    if ctx.is_complete(Stage::Hierarchical) {
        return ctx;
    }

    let cfg = &config.hierarchical;
    if !cfg.enabled {
        debug!("Hierarchical skipped: disabled");
        return ctx;
    }
    let Some(search) = ctx.search.clone() else {
        return skip_unmet(ctx, Stage::Hierarchical, "no search text");
    };
    if cfg.semantic_queries_only && !ctx.params.search_strategy.uses_semantic() {
        let why = ctx.params.search_strategy.as_str();
        return skip_unmet(ctx, Stage::Hierarchical, why);
    }
    let Some(target) = ctx.scope_chain.first().cloned() else {
        return skip_unmet(ctx, Stage::Hierarchical, "empty scope chain");
    };
    let Some(retriever) = capabilities.hierarchical.as_ref() else {
        return skip_unmet(ctx, Stage::Hierarchical, "no retriever");
    };

    let request = HierarchicalRequest {
        query: search,
        scope_type: target.scope_type,
        scope_id: target.scope_id.clone(),
        max_results: cfg.max_candidates,
        expansion_factor: cfg.expansion_factor,
        min_similarity: cfg.min_similarity,
    };

    let traversal = async {
        if !retriever
            .has_summaries(target.scope_type, target.scope_id.as_deref())
            .await?
        {
            return Ok(None);
        }
        retriever.retrieve(&request).await.map(Some)
    };

    let result = match call_with_timeout(cfg.timeout_ms, traversal).await {
        Ok(Some(result)) => result,
        Ok(None) => {
            debug!(scope = %target, "No summaries for scope");
            return skip_unmet(ctx, Stage::Hierarchical, "no summaries");
        }
        Err(e) => return degrade(ctx, Stage::Hierarchical, &e),
    };

    let mut candidate_ids = HashSet::new();
    let mut candidate_scores = HashMap::new();
    for entry in result.entries {
        if !ctx.params.types.contains(&entry.entry_type) {
            continue;
        }
        merge_max(&mut candidate_scores, &entry.id, entry.score);
        candidate_ids.insert(entry.id);
    }

    debug!(
        scope = %target,
        candidates = candidate_ids.len(),
        levels = result.steps.len(),
        "Hierarchical retrieval complete"
    );

    ctx.hierarchical = Some(HierarchicalState {
        applied: true,
        candidate_ids,
        candidate_scores,
        levels_traversed: result.steps.len(),
        total_time_ms: result.total_time_ms,
    });
    ctx.mark_complete(Stage::Hierarchical);
    ctx
}

/// Restrict fetched rows to the hierarchical candidates.
///
/// Applies only when the hierarchical stage ran and produced a non-empty
/// candidate set. Candidate similarities are merged into the semantic
/// scores with [`merge_max`].
pub fn filter_by_hierarchical_candidates(mut ctx: PipelineContext) -> PipelineContext {
    let Some(state) = ctx.hierarchical.as_ref() else {
        return ctx;
    };
    if !state.applied {
        return ctx;
    }

    if !state.candidate_ids.is_empty() {
        let before = ctx.fetched_entries.values().map(Vec::len).sum::<usize>();
        for rows in ctx.fetched_entries.values_mut() {
            rows.retain(|row| state.candidate_ids.contains(&row.entry.id));
        }
        let after = ctx.fetched_entries.values().map(Vec::len).sum::<usize>();
        debug!(before, after, "Restricted fetched entries to hierarchical candidates");
    }

    for (id, score) in &state.candidate_scores {
        merge_max(&mut ctx.semantic_scores, id, *score);
    }
    ctx
}
