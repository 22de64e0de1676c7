//! Lexical stage: full-text search across every query variant.

use std::collections::{HashMap, HashSet};

use futures::future::try_join_all;
use tracing::debug;

use recall_types::{EntryType, PerType, PipelineConfig};

use crate::collaborators::Capabilities;
use crate::context::{merge_max, PipelineContext};
use crate::stages::{call_with_timeout, degrade, skip_unmet};
use crate::types::Stage;

/// Run every search variant against the lexical backend concurrently.
///
/// With a scored backend, hits are fused per id as the maximum of
/// `raw score x variant weight`. With only a scoreless backend the match
/// sets are unioned and `fts_scores` stays unset. Each variant asks for
/// `(offset + limit) x over_fetch_factor` hits per type so later pages see
/// the same candidates as the first. If any variant fails or times out the
/// remaining variants are dropped and the stage is skipped.
pub async fn lexical_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
    config: &PipelineConfig,
) -> PipelineContext {
    if ctx.is_complete(Stage::Lexical) {
        return ctx;
    }
    if !ctx.params.search_strategy.uses_lexical() {
        let why = ctx.params.search_strategy.as_str();
        return skip_unmet(ctx, Stage::Lexical, why);
    }
    if ctx.search.is_none() {
        return skip_unmet(ctx, Stage::Lexical, "no search text");
    }

    let variants = ctx.effective_queries();
    let types = ctx.params.types.clone();
    let limit = ctx
        .params
        .page_end()
        .saturating_mul(config.lexical.over_fetch_factor);
    let timeout_ms = config.lexical.timeout_ms;

    let mut match_ids: PerType<HashSet<String>> =
        types.iter().map(|t| (*t, HashSet::new())).collect();

    if let Some(scored) = capabilities.lexical_scored.as_ref() {
        let searches = variants.iter().map(|variant| {
            let types = &types;
            async move {
                call_with_timeout(
                    timeout_ms,
                    scored.search_with_scores(&variant.text, types, limit),
                )
                .await
                .map(|per_type| (variant.weight, per_type))
            }
        });

        let results = match try_join_all(searches).await {
            Ok(results) => results,
            Err(e) => return degrade(ctx, Stage::Lexical, &e),
        };

        let mut fused = HashMap::new();
        for (weight, per_type) in results {
            for (entry_type, hits) in per_type {
                let Some(set) = match_ids.get_mut(&entry_type) else {
                    continue;
                };
                for hit in hits {
                    merge_max(&mut fused, &hit.id, hit.score * weight);
                    set.insert(hit.id);
                }
            }
        }

        debug!(
            variants = variants.len(),
            limit,
            matches = count(&match_ids),
            "Lexical search complete"
        );
        ctx.fts_match_ids = Some(match_ids);
        ctx.fts_scores = Some(fused);
    } else if let Some(search) = capabilities.lexical.as_ref() {
        let searches = variants.iter().map(|variant| {
            let types = &types;
            async move {
                call_with_timeout(timeout_ms, search.search(&variant.text, types, limit)).await
            }
        });

        let results = match try_join_all(searches).await {
            Ok(results) => results,
            Err(e) => return degrade(ctx, Stage::Lexical, &e),
        };

        for per_type in results {
            for (entry_type, ids) in per_type {
                if let Some(set) = match_ids.get_mut(&entry_type) {
                    set.extend(ids);
                }
            }
        }

        debug!(
            variants = variants.len(),
            limit,
            matches = count(&match_ids),
            "Lexical search complete (unscored)"
        );
        ctx.fts_match_ids = Some(match_ids);
    } else {
        return skip_unmet(ctx, Stage::Lexical, "no backend");
    }

    ctx.mark_complete(Stage::Lexical);
    ctx
}

fn count(match_ids: &PerType<HashSet<String>>) -> usize {
    match_ids.values().map(HashSet::len).sum()
}

/// Lexical match set for a type, if the lexical stage applied.
pub fn lexical_matches(ctx: &PipelineContext, entry_type: EntryType) -> Option<&HashSet<String>> {
    ctx.fts_match_ids.as_ref().and_then(|m| m.get(&entry_type))
}
