//! Pipeline stages.
//!
//! Each stage takes the context by value and returns it. Optional stages
//! (rewrite, lexical, semantic, hierarchical, tags without a tag filter)
//! never fail: when a precondition is unmet or a collaborator errors they
//! record a [`SkipReason`] and do not mark themselves complete. A stage
//! disabled by config returns the context untouched.
//! Required stages (fetch, filter) return [`PipelineError`](crate::PipelineError).
//!
//! Every stage checks `completed_stages` first, so calling one twice is a
//! no-op.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::context::PipelineContext;
use crate::error::CollaboratorError;
use crate::types::{SkipReason, Stage};

pub mod fetch;
pub mod filter;
pub mod hierarchical;
pub mod lexical;
pub mod rewrite;
pub mod semantic;
pub mod tags;

pub use fetch::fetch_stage;
pub use filter::{dedup_by_scope, filter_by_tags, filter_stage, TagFilterOutcome, TagMatcher};
pub use hierarchical::{filter_by_hierarchical_candidates, hierarchical_stage};
pub use lexical::lexical_stage;
pub use rewrite::rewrite_stage;
pub use semantic::semantic_stage;
pub use tags::tags_stage;

/// Run a collaborator call under a time budget.
pub(crate) async fn call_with_timeout<T, F>(timeout_ms: u64, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout_ms)),
    }
}

/// Record an unmet precondition for `stage`.
pub(crate) fn skip_unmet(mut ctx: PipelineContext, stage: Stage, why: &str) -> PipelineContext {
    debug!(stage = %stage, reason = why, "Stage skipped");
    ctx.record_skip(stage, SkipReason::Precondition);
    ctx
}

/// Record a collaborator failure for `stage`; the stage contributes nothing.
pub(crate) fn degrade(
    mut ctx: PipelineContext,
    stage: Stage,
    error: &CollaboratorError,
) -> PipelineContext {
    warn!(stage = %stage, error = %error, "Collaborator failed; skipping stage");
    ctx.record_skip(stage, SkipReason::from(error));
    ctx
}
