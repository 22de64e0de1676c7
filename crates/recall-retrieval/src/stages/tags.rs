//! Tags stage: attach tags to fetched entries.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use recall_types::{PerType, TagsConfig};

use crate::collaborators::Capabilities;
use crate::context::PipelineContext;
use crate::error::{CollaboratorError, PipelineError};
use crate::stages::{call_with_timeout, degrade, skip_unmet};
use crate::types::Stage;

/// Load tags for every fetched entry.
///
/// Optional unless the request carries a tag filter: without a filter a
/// failing repository only loses tag boosts, with one the query fails
/// rather than return unfiltered results.
pub async fn tags_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
    config: &TagsConfig,
) -> Result<PipelineContext, PipelineError> {
    if ctx.is_complete(Stage::Tags) {
        return Ok(ctx);
    }

    let required = tags_required(&ctx);
    if !config.enabled && !required {
        debug!("Tags skipped: disabled");
        return Ok(ctx);
    }
    if !capabilities.has_tags() {
        if required {
            return Err(PipelineError::Configuration(
                "tag filter requires a tag repository".to_string(),
            ));
        }
        return Ok(skip_unmet(ctx, Stage::Tags, "no repository"));
    }

    let ids = ids_by_type(&ctx);
    if ids.is_empty() {
        ctx.mark_complete(Stage::Tags);
        return Ok(ctx);
    }

    match load_tags(capabilities, config, &ids).await {
        Ok(tags) => {
            debug!(entries = tags.len(), "Tags loaded");
            ctx.tags_by_entry = tags;
            ctx.mark_complete(Stage::Tags);
            Ok(ctx)
        }
        Err(source) if required => Err(PipelineError::RequiredStage {
            stage: Stage::Tags,
            source,
        }),
        Err(e) => Ok(degrade(ctx, Stage::Tags, &e)),
    }
}

/// Tags are required when a non-empty tag filter is present.
pub fn tags_required(ctx: &PipelineContext) -> bool {
    ctx.params.tags.as_ref().is_some_and(|t| !t.is_empty())
}

/// Unique fetched ids per type, skipping types with no rows.
fn ids_by_type(ctx: &PipelineContext) -> PerType<Vec<String>> {
    ctx.fetched_entries
        .iter()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(entry_type, rows)| {
            let mut seen = HashSet::new();
            let ids = rows
                .iter()
                .filter(|row| seen.insert(row.entry.id.as_str()))
                .map(|row| row.entry.id.clone())
                .collect();
            (*entry_type, ids)
        })
        .collect()
}

async fn load_tags(
    capabilities: &Capabilities,
    config: &TagsConfig,
    ids: &PerType<Vec<String>>,
) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
    let use_batch = config.prefer_batch || capabilities.tags.is_none();

    if let (true, Some(batch)) = (use_batch, capabilities.tags_batch.as_ref()) {
        return call_with_timeout(config.timeout_ms, batch.get_tags_batch(ids)).await;
    }

    let Some(per_type) = capabilities.tags.as_ref() else {
        return Err(CollaboratorError::Unavailable(
            "no tag repository configured".to_string(),
        ));
    };

    let mut tags = HashMap::new();
    for (entry_type, type_ids) in ids {
        let loaded =
            call_with_timeout(config.timeout_ms, per_type.get_tags(*entry_type, type_ids)).await?;
        tags.extend(loaded);
    }
    Ok(tags)
}
