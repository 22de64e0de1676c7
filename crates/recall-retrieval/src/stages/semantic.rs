//! Semantic stage: vector similarity across every query variant.

use std::collections::HashMap;

use futures::future::try_join_all;
use tracing::debug;

use recall_types::PipelineConfig;

use crate::collaborators::Capabilities;
use crate::context::{merge_max, PipelineContext};
use crate::stages::{call_with_timeout, degrade, skip_unmet};
use crate::types::Stage;

/// Collect similarity scores for hybrid and semantic searches.
///
/// Scores are fused with [`merge_max`] over `similarity x variant weight`.
/// The per-variant limit is `(offset + limit) x over_fetch_factor`. Any
/// failing variant leaves the context without scores.
pub async fn semantic_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
    config: &PipelineConfig,
) -> PipelineContext {
    if ctx.is_complete(Stage::Semantic) {
        return ctx;
    }
    if !config.semantic.enabled {
        debug!("Semantic skipped: disabled");
        return ctx;
    }
    if !ctx.params.search_strategy.uses_semantic() {
        let why = ctx.params.search_strategy.as_str();
        return skip_unmet(ctx, Stage::Semantic, why);
    }
    if ctx.search.is_none() {
        return skip_unmet(ctx, Stage::Semantic, "no search text");
    }
    let Some(search) = capabilities.semantic.as_ref() else {
        return skip_unmet(ctx, Stage::Semantic, "no backend");
    };

    let variants = ctx.effective_queries();
    let types = ctx.params.types.clone();
    let limit = ctx
        .params
        .page_end()
        .saturating_mul(config.semantic.over_fetch_factor);
    let timeout_ms = config.semantic.timeout_ms;

    let searches = variants.iter().map(|variant| {
        let types = &types;
        async move {
            call_with_timeout(timeout_ms, search.search(&variant.text, types, limit))
                .await
                .map(|hits| (variant.weight, hits))
        }
    });

    let results = match try_join_all(searches).await {
        Ok(results) => results,
        Err(e) => return degrade(ctx, Stage::Semantic, &e),
    };

    let mut scores = HashMap::new();
    for (weight, hits) in results {
        for hit in hits.into_iter().filter(|h| types.contains(&h.entry_type)) {
            merge_max(&mut scores, &hit.id, hit.score * weight);
        }
    }

    debug!(hits = scores.len(), limit, "Semantic search complete");
    for (id, score) in scores {
        merge_max(&mut ctx.semantic_scores, &id, score);
    }
    ctx.mark_complete(Stage::Semantic);
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use recall_types::{EntryType, QueryRequest, ScopeRef, SearchStrategy};

    use crate::mock::{MockEntryRepository, MockSemanticSearch};
    use crate::types::SkipReason;

    fn context(strategy: SearchStrategy) -> PipelineContext {
        PipelineContext::new(
            QueryRequest::new(vec![EntryType::Knowledge], vec![ScopeRef::global()])
                .with_search("database")
                .with_strategy(strategy),
        )
    }

    fn caps(search: MockSemanticSearch) -> Capabilities {
        Capabilities::new(Arc::new(MockEntryRepository::default())).with_semantic(Arc::new(search))
    }

    #[tokio::test]
    async fn test_collects_scores_for_requested_types() {
        let search = MockSemanticSearch::default()
            .with_hit("database", EntryType::Knowledge, "k1", 0.91)
            .with_hit("database", EntryType::Tool, "t1", 0.99);

        let ctx = semantic_stage(
            context(SearchStrategy::Hybrid),
            &caps(search),
            &PipelineConfig::default(),
        )
        .await;

        assert_eq!(ctx.semantic_scores.len(), 1);
        assert!((ctx.semantic_scores["k1"] - 0.91).abs() < f32::EPSILON);
        assert!(ctx.is_complete(Stage::Semantic));
    }

    #[tokio::test]
    async fn test_skipped_for_lexical_only_strategies() {
        for strategy in [SearchStrategy::Fts5, SearchStrategy::Direct] {
            let search = MockSemanticSearch::default();
            let caps = caps(search);
            let ctx = semantic_stage(context(strategy), &caps, &PipelineConfig::default()).await;
            assert!(!ctx.is_complete(Stage::Semantic));
            assert_eq!(ctx.skip_reason(Stage::Semantic), Some(SkipReason::Precondition));
        }
    }

    #[tokio::test]
    async fn test_disabled_stage_leaves_context_unchanged() {
        let mut config = PipelineConfig::default();
        config.semantic.enabled = false;
        let search = Arc::new(MockSemanticSearch::default());
        let caps = Capabilities::new(Arc::new(MockEntryRepository::default()))
            .with_semantic(search.clone());

        let before = context(SearchStrategy::Hybrid);
        let after = semantic_stage(before.clone(), &caps, &config).await;
        assert_eq!(after, before);
        assert_eq!(search.calls(), 0);
    }

    #[tokio::test]
    async fn test_over_fetch_window_covers_offset() {
        let search = Arc::new(MockSemanticSearch::default());
        let caps = Capabilities::new(Arc::new(MockEntryRepository::default()))
            .with_semantic(search.clone());
        let mut ctx = context(SearchStrategy::Semantic);
        ctx.params.limit = 3;
        ctx.params.offset = 30;

        let config = PipelineConfig::default();
        semantic_stage(ctx, &caps, &config).await;
        assert_eq!(search.last_limit(), 33 * config.semantic.over_fetch_factor);
    }

    #[tokio::test]
    async fn test_failure_is_noop() {
        let before = context(SearchStrategy::Semantic);
        let after = semantic_stage(
            before.clone(),
            &caps(MockSemanticSearch::default().with_failure()),
            &PipelineConfig::default(),
        )
        .await;

        let mut expected = before;
        expected.record_skip(Stage::Semantic, SkipReason::Unavailable);
        assert_eq!(after, expected);
    }
}
