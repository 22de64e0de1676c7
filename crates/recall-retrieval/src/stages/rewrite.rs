//! Rewrite stage: intent tagging and query variants.

use tracing::{debug, warn};

use recall_types::RewriteConfig;

use crate::classifier::IntentClassifier;
use crate::collaborators::{Capabilities, RewriteFlags};
use crate::context::PipelineContext;
use crate::stages::{call_with_timeout, skip_unmet};
use crate::types::{RewriteStrategy, SearchQuery, Stage};

/// Classify the query intent and, when a rewrite service is attached and
/// a technique is enabled, expand the search text into weighted variants.
///
/// With `disable_rewrite` the original text is the only variant and no
/// classification happens. Any rewrite failure falls back to the original
/// text with strategy `Direct`.
pub async fn rewrite_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
    config: &RewriteConfig,
    classifier: &IntentClassifier,
) -> PipelineContext {
    if ctx.is_complete(Stage::Rewrite) {
        return ctx;
    }

    let Some(text) = ctx.search.clone() else {
        return skip_unmet(ctx, Stage::Rewrite, "no search text");
    };

    if ctx.params.disable_rewrite {
        ctx.search_queries = vec![SearchQuery::original(text)];
        ctx.rewrite_strategy = Some(RewriteStrategy::Direct);
        ctx.mark_complete(Stage::Rewrite);
        return ctx;
    }

    let classification = classifier.classify(&text);
    ctx.rewrite_intent = Some(classification.intent);
    ctx.search_queries = vec![SearchQuery::original(text.clone())];
    ctx.rewrite_strategy = Some(RewriteStrategy::Direct);

    let flags = RewriteFlags {
        hyde: ctx.params.enable_hyde.unwrap_or(config.enable_hyde),
        expansion: ctx.params.enable_expansion.unwrap_or(config.enable_expansion),
        decomposition: ctx
            .params
            .enable_decomposition
            .unwrap_or(config.enable_decomposition),
    };

    if let Some(rewriter) = capabilities.rewriter.as_ref() {
        if config.enabled && flags.any() {
            let result = call_with_timeout(
                config.timeout_ms,
                rewriter.rewrite(&text, classification.intent, flags),
            )
            .await;

            match result {
                Ok(rewrite) => {
                    let queries = sanitize_variants(rewrite.queries, config.max_variants);
                    if queries.is_empty() {
                        debug!("Rewrite produced no usable variants; keeping original text");
                    } else {
                        debug!(
                            variants = queries.len(),
                            strategy = ?rewrite.strategy,
                            "Query rewritten"
                        );
                        ctx.search_queries = queries;
                        ctx.rewrite_strategy = Some(rewrite.strategy);
                        ctx.rewrite_intent = Some(rewrite.intent);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Query rewrite failed; using original text");
                }
            }
        }
    }

    ctx.mark_complete(Stage::Rewrite);
    ctx
}

/// Drop blank or non-positive variants, clamp weights to 1.0, keep the
/// first occurrence of each text and cap the count.
fn sanitize_variants(queries: Vec<SearchQuery>, max_variants: usize) -> Vec<SearchQuery> {
    let mut seen = std::collections::HashSet::new();
    queries
        .into_iter()
        .filter(|q| !q.text.trim().is_empty() && q.weight > 0.0)
        .filter(|q| seen.insert(q.text.trim().to_lowercase()))
        .map(|mut q| {
            q.text = q.text.trim().to_string();
            q.weight = q.weight.min(1.0);
            q
        })
        .take(max_variants.max(1))
        .collect()
}
