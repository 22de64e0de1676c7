//! Retrieval pipeline orchestrator.
//!
//! Runs the stages in a fixed order:
//!
//! ```text
//! validate -> rewrite -> lexical -> semantic -> hierarchical -> fetch
//!          -> hierarchical candidate filter -> tags -> filter -> rank -> page
//! ```
//!
//! Optional stages degrade to no-ops and report why in
//! [`PipelineDiagnostics::skipped_stages`]. Fetch and filter are required,
//! as is tags when the request carries a tag filter. With a deadline,
//! optional stages that have not started when it passes are skipped with
//! [`SkipReason::Deadline`] and each collaborator call is bounded by the
//! time remaining.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use recall_types::{PipelineConfig, QueryRequest, ResponseMeta};

use crate::classifier::IntentClassifier;
use crate::collaborators::Capabilities;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::rank::{page, rank_entries};
use crate::stages::{
    fetch_stage, filter_by_hierarchical_candidates, filter_stage, hierarchical_stage,
    lexical_stage, rewrite_stage, semantic_stage, tags::tags_required, tags_stage,
};
use crate::types::{PipelineDiagnostics, QueryResponse, SkipReason, SkippedStage, Stage};

const OPTIONAL_STAGES: [Stage; 5] = [
    Stage::Rewrite,
    Stage::Lexical,
    Stage::Semantic,
    Stage::Hierarchical,
    Stage::Tags,
];

/// Query pipeline over a fixed set of collaborators.
///
/// Cheap to share: one instance serves any number of concurrent queries,
/// each with its own [`PipelineContext`].
#[derive(Debug, Clone)]
pub struct RetrievalPipeline {
    capabilities: Capabilities,
    config: PipelineConfig,
    classifier: IntentClassifier,
}

impl RetrievalPipeline {
    pub fn new(capabilities: Capabilities, config: PipelineConfig) -> Self {
        Self {
            capabilities,
            config,
            classifier: IntentClassifier::new(),
        }
    }

    /// Builder: use a custom intent classifier
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Execute a query with no deadline.
    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResponse, PipelineError> {
        self.execute_with_deadline(request, None).await
    }

    /// Execute a query, skipping optional stages once `deadline` has elapsed.
    pub async fn execute_with_deadline(
        &self,
        request: QueryRequest,
        deadline: Option<Duration>,
    ) -> Result<QueryResponse, PipelineError> {
        let start = Instant::now();

        request.validate()?;
        self.check_capabilities(&request)?;
        let config = self.config.with_overrides(&request.overrides);
        config.validate().map_err(PipelineError::Configuration)?;

        let (offset, limit) = (request.offset, request.limit);
        let budget = Budget { start, deadline };
        let mut ctx = PipelineContext::new(request);
        let mut deadline_exceeded = false;

        macro_rules! optional {
            ($stage:expr, |$cfg:ident| $run:expr) => {
                match budget.bounded(&config) {
                    Some($cfg) => $run,
                    None => {
                        debug!(stage = %$stage, "Deadline passed; skipping stage");
                        deadline_exceeded = true;
                        ctx.record_skip($stage, SkipReason::Deadline);
                        ctx
                    }
                }
            };
        }

        ctx = optional!(Stage::Rewrite, |cfg| {
            rewrite_stage(ctx, &self.capabilities, &cfg.rewrite, &self.classifier).await
        });
        ctx = optional!(Stage::Lexical, |cfg| {
            lexical_stage(ctx, &self.capabilities, &cfg).await
        });
        ctx = optional!(Stage::Semantic, |cfg| {
            semantic_stage(ctx, &self.capabilities, &cfg).await
        });
        ctx = optional!(Stage::Hierarchical, |cfg| {
            hierarchical_stage(ctx, &self.capabilities, &cfg).await
        });

        ctx = fetch_stage(ctx, &self.capabilities).await?;
        ctx = filter_by_hierarchical_candidates(ctx);

        if tags_required(&ctx) {
            ctx = tags_stage(ctx, &self.capabilities, &config.tags).await?;
        } else {
            ctx = optional!(Stage::Tags, |cfg| {
                tags_stage(ctx, &self.capabilities, &cfg.tags).await?
            });
        }

        ctx = filter_stage(ctx, &config)?;

        let diagnostics = diagnostics(&ctx, deadline_exceeded, start);
        let filtered = std::mem::take(&mut ctx.filtered);
        let ranked = rank_entries(
            filtered,
            ctx.fts_scores.as_ref(),
            &ctx.semantic_scores,
            &config.ranking,
        );
        let total = ranked.len();
        let results = page(ranked, offset, limit);
        let meta = ResponseMeta::new(total, offset, results.len());

        if deadline_exceeded {
            warn!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                skipped = ?diagnostics.skipped_stages,
                "Query deadline exceeded; some optional stages skipped"
            );
        }
        info!(
            total = meta.total_count,
            returned = meta.returned_count,
            intent = ?diagnostics.intent,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(QueryResponse {
            results,
            meta,
            diagnostics,
        })
    }

    /// Reject requests whose filters need a collaborator this pipeline lacks.
    fn check_capabilities(&self, request: &QueryRequest) -> Result<(), PipelineError> {
        if request.related_to.is_some() && self.capabilities.relations.is_none() {
            return Err(PipelineError::Configuration(
                "related_to filter requires a relation repository".to_string(),
            ));
        }
        let has_tag_filter = request.tags.as_ref().is_some_and(|t| !t.is_empty());
        if has_tag_filter && !self.capabilities.has_tags() {
            return Err(PipelineError::Configuration(
                "tag filter requires a tag repository".to_string(),
            ));
        }
        Ok(())
    }
}

/// Time budget for one query.
struct Budget {
    start: Instant,
    deadline: Option<Duration>,
}

impl Budget {
    /// The config with every collaborator timeout capped at the time left,
    /// or None once the deadline has passed.
    fn bounded(&self, config: &PipelineConfig) -> Option<PipelineConfig> {
        let Some(deadline) = self.deadline else {
            return Some(config.clone());
        };
        let remaining = deadline.checked_sub(self.start.elapsed())?;
        if remaining.is_zero() {
            return None;
        }

        let remaining_ms = (remaining.as_millis() as u64).max(1);
        let mut bounded = config.clone();
        bounded.rewrite.timeout_ms = bounded.rewrite.timeout_ms.min(remaining_ms);
        bounded.lexical.timeout_ms = bounded.lexical.timeout_ms.min(remaining_ms);
        bounded.semantic.timeout_ms = bounded.semantic.timeout_ms.min(remaining_ms);
        bounded.hierarchical.timeout_ms = bounded.hierarchical.timeout_ms.min(remaining_ms);
        bounded.tags.timeout_ms = bounded.tags.timeout_ms.min(remaining_ms);
        Some(bounded)
    }
}

fn diagnostics(ctx: &PipelineContext, deadline_exceeded: bool, start: Instant) -> PipelineDiagnostics {
    let (hierarchical_levels, hierarchical_candidates) = ctx
        .hierarchical
        .as_ref()
        .map(|h| (h.levels_traversed, h.candidate_ids.len()))
        .unwrap_or((0, 0));

    PipelineDiagnostics {
        intent: ctx.rewrite_intent,
        rewrite_strategy: ctx.rewrite_strategy,
        search_queries: ctx.search_queries.clone(),
        completed_stages: ctx.completed_stages.iter().copied().collect(),
        skipped_stages: skipped_stages(ctx),
        deadline_exceeded,
        hierarchical_levels,
        hierarchical_candidates,
        total_time_ms: start.elapsed().as_millis() as u64,
    }
}

/// Every optional stage that did not complete, in stage order. A stage
/// with no recorded reason was turned off by config.
fn skipped_stages(ctx: &PipelineContext) -> Vec<SkippedStage> {
    OPTIONAL_STAGES
        .iter()
        .copied()
        .filter(|stage| !ctx.is_complete(*stage))
        .map(|stage| {
            let reason = ctx.skip_reason(stage).unwrap_or(SkipReason::Disabled);
            SkippedStage::new(stage, reason)
        })
        .collect()
}
